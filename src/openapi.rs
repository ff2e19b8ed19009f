use utoipa::OpenApi;

use crate::{errors, handlers, services};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Terroir API",
        description = "Order creation, stock reservation and payment reconciliation for the Terroir marketplace",
        version = env!("CARGO_PKG_VERSION")
    ),
    paths(
        handlers::orders::create_order,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::payments::init_payment,
        handlers::payment_webhooks::payment_webhook,
        handlers::payment_webhooks::stripe_webhook,
    ),
    components(schemas(
        errors::ErrorResponse,
        services::orders::CreateOrderRequest,
        services::orders::OrderItemInput,
        services::orders::OrderResponse,
        services::orders::OrderLineResponse,
        services::orders::OrderListResponse,
        services::payments::InitPaymentRequest,
        services::payments::PaymentSession,
        services::payments::PaymentWebhookPayload,
        handlers::payment_webhooks::WebhookAck,
    )),
    tags(
        (name = "orders", description = "Order creation and history"),
        (name = "payments", description = "Payment sessions and provider webhooks"),
    )
)]
pub struct ApiDoc;
