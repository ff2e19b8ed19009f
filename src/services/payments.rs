use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use sea_orm::{ActiveModelTrait, Set};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::{
    config::AppConfig,
    db::DbPool,
    entities::order::{self, Model as OrderModel, OrderStatus, PaymentEvent, StatusTransition},
    entities::order_line::Model as OrderLineModel,
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::OrderService,
};

const SUPPORTED_PROVIDERS: &[&str] = &["stripe", "paygreen", "manual"];

fn validate_provider(provider: &str) -> Result<(), ValidationError> {
    if SUPPORTED_PROVIDERS.contains(&provider.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ValidationError::new("unsupported_provider"))
    }
}

/// Request/response types for payment session initiation

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct InitPaymentRequest {
    pub order_id: i64,
    #[validate(custom = "validate_provider")]
    pub provider: String,
    #[validate(url(message = "success_url must be a valid URL"))]
    pub success_url: String,
    #[validate(url(message = "cancel_url must be a valid URL"))]
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentSession {
    pub checkout_url: String,
    pub payment_reference: String,
}

/// Generic signed webhook body. The request-level `X-Payment-Signature`
/// header must equal the `signature` field (checked at the boundary).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentWebhookPayload {
    pub provider: String,
    pub order_id: i64,
    pub event: String,
    pub signature: String,
    #[serde(default)]
    pub payload: Value,
}

/// Maps a generic webhook event name onto the reconciliation event kind.
pub fn parse_generic_event(event: &str) -> Result<PaymentEvent, ServiceError> {
    match event {
        "payment_succeeded" => Ok(PaymentEvent::Succeeded),
        "payment_failed" => Ok(PaymentEvent::Failed),
        "payment_refunded" => Ok(PaymentEvent::Refunded),
        other => Err(ServiceError::PaymentProvider(format!(
            "Unknown event: {other}"
        ))),
    }
}

/// Minimal Stripe hosted-checkout client over the HTTP API.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

impl StripeClient {
    pub fn new(
        secret_key: String,
        api_base: String,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::PaymentProvider(format!("Stripe client error: {e}")))?;
        Ok(Self {
            http,
            secret_key,
            api_base,
        })
    }

    /// Opens a hosted checkout session with the order's lines as
    /// provider-side line items.
    pub async fn create_checkout_session(
        &self,
        order: &OrderModel,
        lines: &[OrderLineModel],
        success_url: &str,
        cancel_url: &str,
    ) -> Result<StripeCheckoutSession, ServiceError> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            (
                "success_url".into(),
                format!(
                    "{success_url}?order={}&session_id={{CHECKOUT_SESSION_ID}}",
                    order.id
                ),
            ),
            ("cancel_url".into(), format!("{cancel_url}?order={}", order.id)),
            ("client_reference_id".into(), order.id.to_string()),
            ("metadata[order_id]".into(), order.id.to_string()),
        ];

        let currency = order.currency.to_ascii_lowercase();
        for (i, line) in lines.iter().enumerate() {
            form.push((
                format!("line_items[{i}][price_data][currency]"),
                currency.clone(),
            ));
            form.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                line.product_title.clone(),
            ));
            form.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                line.unit_price_cents.to_string(),
            ));
            form.push((format!("line_items[{i}][quantity]"), line.quantity.to_string()));
        }

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentProvider(format!("Stripe error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::PaymentProvider(format!(
                "Stripe error: {status}: {body}"
            )));
        }

        response
            .json::<StripeCheckoutSession>()
            .await
            .map_err(|e| ServiceError::PaymentProvider(format!("Stripe error: {e}")))
    }
}

/// Service opening payment sessions for pending orders and reconciling
/// asynchronous provider callbacks onto the order state machine.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    stripe: Option<StripeClient>,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        orders: Arc<OrderService>,
        stripe: Option<StripeClient>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            orders,
            stripe,
            event_sender,
        }
    }

    /// Builds the Stripe client from configuration when a secret key is set.
    pub fn stripe_from_config(cfg: &AppConfig) -> Result<Option<StripeClient>, ServiceError> {
        cfg.stripe_secret_key
            .as_ref()
            .map(|key| {
                StripeClient::new(
                    key.clone(),
                    cfg.stripe_api_base.clone(),
                    Duration::from_secs(cfg.payment_http_timeout_secs),
                )
            })
            .transpose()
    }

    /// Opens a payment session for a pending order owned by `user_id`.
    ///
    /// The provider reference is persisted before the checkout URL is
    /// returned so a later webhook can find the order even if checkout is
    /// abandoned. Order status is never mutated here.
    #[instrument(skip(self, request), fields(order_id = request.order_id, provider = %request.provider))]
    pub async fn init_session(
        &self,
        user_id: i64,
        request: InitPaymentRequest,
    ) -> Result<PaymentSession, ServiceError> {
        request.validate()?;

        let order = self
            .orders
            .get_order_model(request.order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if !order.status.accepts_payment_session() {
            return Err(ServiceError::PaymentProvider(
                "Order already processed".to_string(),
            ));
        }

        let provider = request.provider.to_ascii_lowercase();
        let session = if provider == "stripe" {
            let stripe = self.stripe.as_ref().ok_or_else(|| {
                ServiceError::PaymentProvider("Stripe not configured".to_string())
            })?;

            let lines = self.orders.load_lines(order.id).await?;
            let checkout = stripe
                .create_checkout_session(&order, &lines, &request.success_url, &request.cancel_url)
                .await?;
            let checkout_url = checkout.url.ok_or_else(|| {
                ServiceError::PaymentProvider("Stripe session missing URL".to_string())
            })?;

            self.record_session(order, &provider, &checkout.id).await?;
            PaymentSession {
                checkout_url,
                payment_reference: checkout.id,
            }
        } else {
            // Sandbox/manual placeholder: deterministic reference, no
            // provider round-trip.
            let reference = format!("{provider}_session_{}", order.id);
            self.record_session(order, &provider, &reference).await?;
            PaymentSession {
                checkout_url: format!("https://checkout.{provider}.sandbox/session/{reference}"),
                payment_reference: reference,
            }
        };

        counter!("payment_sessions_opened_total", 1);
        if let Some(sender) = &self.event_sender {
            sender
                .send(Event::PaymentSessionOpened {
                    order_id: request.order_id,
                    provider,
                })
                .await;
        }

        Ok(session)
    }

    async fn record_session(
        &self,
        order: OrderModel,
        provider: &str,
        reference: &str,
    ) -> Result<OrderModel, ServiceError> {
        let mut active: order::ActiveModel = order.into();
        active.payment_provider = Set(Some(provider.to_string()));
        active.payment_reference = Set(Some(reference.to_string()));
        Ok(active.update(&*self.db).await?)
    }

    /// Reconciles a generic signed-payload webhook onto the order.
    #[instrument(skip(self, data), fields(order_id = data.order_id, event = %data.event))]
    pub async fn handle_webhook(
        &self,
        data: PaymentWebhookPayload,
    ) -> Result<(OrderModel, OrderStatus), ServiceError> {
        let order = self
            .orders
            .get_order_model(data.order_id)
            .await?
            .ok_or_else(|| ServiceError::PaymentProvider("Order not found".to_string()))?;

        if order.payment_provider.as_deref() != Some(data.provider.as_str()) {
            return Err(ServiceError::PaymentProvider(
                "Provider mismatch".to_string(),
            ));
        }

        let event = parse_generic_event(&data.event)?;
        let reference = match event {
            PaymentEvent::Succeeded => data
                .payload
                .get("payment_intent")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| order.payment_reference.clone()),
            _ => None,
        };

        self.apply_event(order, event, reference).await
    }

    /// Reconciles a Stripe event (already signature-verified at the
    /// boundary) onto the order it references.
    #[instrument(skip(self, event))]
    pub async fn handle_stripe_event(
        &self,
        event: &Value,
    ) -> Result<(OrderModel, OrderStatus), ServiceError> {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
        let object = event
            .get("data")
            .and_then(|d| d.get("object"))
            .cloned()
            .unwrap_or(Value::Null);

        let order_id = resolve_stripe_order_id(&object).ok_or_else(|| {
            ServiceError::PaymentProvider("Stripe webhook missing order reference".to_string())
        })?;

        let order = self
            .orders
            .get_order_model(order_id)
            .await?
            .ok_or_else(|| ServiceError::PaymentProvider("Order not found".to_string()))?;

        let (payment_event, reference) = match event_type {
            "checkout.session.completed" => {
                let reference = object
                    .get("payment_intent")
                    .and_then(Value::as_str)
                    .or_else(|| object.get("id").and_then(Value::as_str))
                    .map(str::to_string);
                (PaymentEvent::Succeeded, reference)
            }
            "charge.refunded" | "payment_intent.canceled" => (PaymentEvent::Refunded, None),
            "checkout.session.expired" | "payment_intent.payment_failed" => {
                (PaymentEvent::Failed, None)
            }
            other => {
                return Err(ServiceError::PaymentProvider(format!(
                    "Unhandled Stripe event: {other}"
                )))
            }
        };

        self.apply_event(order, payment_event, reference).await
    }

    /// Applies the payment event through the explicit transition table.
    /// Duplicate deliveries of an already-applied event are acknowledged
    /// without writing; out-of-order events are rejected.
    async fn apply_event(
        &self,
        order: OrderModel,
        event: PaymentEvent,
        reference: Option<String>,
    ) -> Result<(OrderModel, OrderStatus), ServiceError> {
        match order.status.apply_payment_event(event) {
            StatusTransition::Apply(next) => {
                let updated = self.orders.update_order_status(order, next, reference).await?;
                counter!("payment_events_applied_total", 1);
                Ok((updated, next))
            }
            StatusTransition::AlreadyApplied => {
                info!(order_id = order.id, %event, status = %order.status, "event already applied");
                counter!("payment_events_replayed_total", 1);
                let status = order.status;
                Ok((order, status))
            }
            StatusTransition::Rejected => {
                warn!(order_id = order.id, %event, status = %order.status, "transition rejected");
                counter!("payment_events_rejected_total", 1);
                Err(ServiceError::PaymentProvider(format!(
                    "Event {event} not allowed for order in status {}",
                    order.status
                )))
            }
        }
    }
}

fn resolve_stripe_order_id(object: &Value) -> Option<i64> {
    let from_metadata = object
        .get("metadata")
        .and_then(|m| m.get("order_id"))
        .and_then(value_as_i64);
    from_metadata.or_else(|| object.get("client_reference_id").and_then(value_as_i64))
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
