use axum::{
    extract::State,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::payments::InitPaymentRequest,
    AppState,
};

/// Opens a payment session for one of the caller's pending orders.
#[utoipa::path(
    post,
    path = "/api/v1/payments/init",
    request_body = InitPaymentRequest,
    responses(
        (status = 200, description = "Checkout session opened", body = crate::services::payments::PaymentSession),
        (status = 400, description = "Order not payable or provider failure", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
#[instrument(skip(state, request), fields(user_id = user.user_id))]
pub async fn init_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<InitPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let session = state
        .services
        .payments
        .init_session(user.user_id, request)
        .await?;
    Ok(Json(session))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/init", post(init_payment))
}
