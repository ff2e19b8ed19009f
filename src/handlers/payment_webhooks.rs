use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::instrument;
use utoipa::ToSchema;

use crate::{
    errors::ServiceError,
    services::payments::PaymentWebhookPayload,
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

/// Acknowledgement returned to the provider once the event has been
/// reconciled (or recognized as a duplicate).
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub status: String,
    pub order_id: i64,
}

/// Generic provider callback carrying a shared-secret signature both in the
/// `X-Payment-Signature` header and in the body; the two must match exactly.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = PaymentWebhookPayload,
    responses(
        (status = 202, description = "Event reconciled", body = WebhookAck),
        (status = 400, description = "Invalid signature or rejected event", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
#[instrument(skip(state, headers, payload), fields(order_id = payload.order_id, event = %payload.event))]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PaymentWebhookPayload>,
) -> Result<impl IntoResponse, ServiceError> {
    let header_signature = headers
        .get("x-payment-signature")
        .and_then(|value| value.to_str().ok());
    if header_signature != Some(payload.signature.as_str()) {
        return Err(ServiceError::PaymentProvider(
            "Invalid signature".to_string(),
        ));
    }

    let (order, status) = state.services.payments.handle_webhook(payload).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAck {
            status: status.to_string(),
            order_id: order.id,
        }),
    ))
}

/// Stripe callback: the raw body is HMAC-verified against the
/// `Stripe-Signature` header before any JSON is trusted.
#[utoipa::path(
    post,
    path = "/api/v1/payments/stripe/webhook",
    request_body(content = String, description = "Raw Stripe event payload"),
    responses(
        (status = 202, description = "Event reconciled", body = WebhookAck),
        (status = 400, description = "Invalid signature or rejected event", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
#[instrument(skip(state, headers, body))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .ok_or_else(|| {
            ServiceError::PaymentProvider("Stripe webhooks not configured".to_string())
        })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ServiceError::PaymentProvider("Missing signature".to_string()))?;

    if !verify_stripe_signature(
        secret,
        &body,
        signature,
        state.config.stripe_webhook_tolerance_secs,
    ) {
        return Err(ServiceError::PaymentProvider(
            "Invalid signature".to_string(),
        ));
    }

    let event: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::PaymentProvider(format!("Malformed event: {e}")))?;

    let (order, status) = state.services.payments.handle_stripe_event(&event).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAck {
            status: status.to_string(),
            order_id: order.id,
        }),
    ))
}

/// Verifies a `Stripe-Signature` header (`t=<ts>,v1=<hex hmac>`) over the raw
/// payload. The signed message is `{t}.{body}`; the timestamp must be within
/// `tolerance_secs` of now.
pub fn verify_stripe_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_secs: u64,
) -> bool {
    let mut timestamp = "";
    let mut v1 = "";
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(value)) => timestamp = value,
            (Some("v1"), Some(value)) => v1 = value,
            _ => {}
        }
    }
    if timestamp.is_empty() || v1.is_empty() {
        return false;
    }

    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts).unsigned_abs() > tolerance_secs {
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, v1)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(payment_webhook))
        .route("/stripe/webhook", post(stripe_webhook))
}
