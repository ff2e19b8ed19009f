mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp, DEFAULT_USER};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

async fn seed_pending_order(app: &TestApp, key: &str) -> Value {
    let product = app
        .seed_product(&format!("Basket {key}"), 1_250, None, 20)
        .await;
    let response = app
        .request_as(
            DEFAULT_USER,
            Method::POST,
            "/api/v1/orders",
            Some(json!({"items": [{"product_id": product.id, "quantity": 2}]})),
            &[("idempotency-key", key)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await
}

async fn fetch_order(app: &TestApp, order_id: i64) -> Value {
    let response = app
        .request_as(
            DEFAULT_USER,
            Method::GET,
            &format!("/api/v1/orders/{order_id}"),
            None,
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    response_json(response).await
}

fn generic_webhook(order_id: i64, event: &str, payment_intent: Option<&str>) -> Value {
    let mut payload = json!({});
    if let Some(intent) = payment_intent {
        payload = json!({ "payment_intent": intent });
    }
    json!({
        "provider": "manual",
        "order_id": order_id,
        "event": event,
        "signature": "secret-signature",
        "payload": payload,
    })
}

async fn post_webhook(app: &TestApp, body: Value, signature: &str) -> axum::response::Response {
    app.request_anonymous(
        Method::POST,
        "/api/v1/payments/webhook",
        Some(body),
        &[("x-payment-signature", signature)],
    )
    .await
}

fn stripe_signature(secret: &str, body: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(body);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn sandbox_provider_opens_deterministic_session() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "init-sandbox").await;
    let order_id = order["id"].as_i64().unwrap();

    let response = app
        .request_as(
            DEFAULT_USER,
            Method::POST,
            "/api/v1/payments/init",
            Some(json!({
                "order_id": order_id,
                "provider": "paygreen",
                "success_url": "https://shop.example/success",
                "cancel_url": "https://shop.example/cancel",
            })),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let session = response_json(response).await;

    let reference = format!("paygreen_session_{order_id}");
    assert_eq!(session["payment_reference"], reference);
    assert_eq!(
        session["checkout_url"],
        format!("https://checkout.paygreen.sandbox/session/{reference}")
    );

    // Session initiation records the provider but never touches status.
    let order = fetch_order(&app, order_id).await;
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_provider"], "paygreen");
    assert_eq!(order["payment_reference"], reference);
}

#[tokio::test]
async fn init_rejects_foreign_orders_and_bad_providers() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "init-scoped").await;
    let order_id = order["id"].as_i64().unwrap();

    let foreign = app
        .request_as(
            2,
            Method::POST,
            "/api/v1/payments/init",
            Some(json!({
                "order_id": order_id,
                "provider": "manual",
                "success_url": "https://shop.example/success",
                "cancel_url": "https://shop.example/cancel",
            })),
            &[],
        )
        .await;
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    let unsupported = app
        .request_as(
            DEFAULT_USER,
            Method::POST,
            "/api/v1/payments/init",
            Some(json!({
                "order_id": order_id,
                "provider": "paypal",
                "success_url": "https://shop.example/success",
                "cancel_url": "https://shop.example/cancel",
            })),
            &[],
        )
        .await;
    assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn init_refuses_orders_already_processed() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "init-paid").await;
    let order_id = order["id"].as_i64().unwrap();

    let paid = post_webhook(
        &app,
        generic_webhook(order_id, "payment_succeeded", Some("pi_settled")),
        "secret-signature",
    )
    .await;
    assert_eq!(paid.status(), StatusCode::ACCEPTED);

    let response = app
        .request_as(
            DEFAULT_USER,
            Method::POST,
            "/api/v1/payments/init",
            Some(json!({
                "order_id": order_id,
                "provider": "manual",
                "success_url": "https://shop.example/success",
                "cancel_url": "https://shop.example/cancel",
            })),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn successful_payment_marks_order_paid_with_settlement_reference() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "wh-success").await;
    let order_id = order["id"].as_i64().unwrap();

    let response = post_webhook(
        &app,
        generic_webhook(order_id, "payment_succeeded", Some("pi_42")),
        "secret-signature",
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let ack = response_json(response).await;
    assert_eq!(ack["status"], "paid");
    assert_eq!(ack["order_id"], order_id);

    let order = fetch_order(&app, order_id).await;
    assert_eq!(order["status"], "paid");
    assert_eq!(order["payment_reference"], "pi_42");
}

#[tokio::test]
async fn duplicate_success_webhook_is_acknowledged_without_changes() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "wh-duplicate").await;
    let order_id = order["id"].as_i64().unwrap();

    let first = post_webhook(
        &app,
        generic_webhook(order_id, "payment_succeeded", Some("pi_first")),
        "secret-signature",
    )
    .await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let replay = post_webhook(
        &app,
        generic_webhook(order_id, "payment_succeeded", Some("pi_second")),
        "secret-signature",
    )
    .await;
    assert_eq!(replay.status(), StatusCode::ACCEPTED);
    let ack = response_json(replay).await;
    assert_eq!(ack["status"], "paid");

    // The original settlement reference is kept.
    let order = fetch_order(&app, order_id).await;
    assert_eq!(order["payment_reference"], "pi_first");
}

#[tokio::test]
async fn signature_mismatch_is_rejected_before_reconciliation() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "wh-signature").await;
    let order_id = order["id"].as_i64().unwrap();

    let response = post_webhook(
        &app,
        generic_webhook(order_id, "payment_succeeded", None),
        "wrong-signature",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let order = fetch_order(&app, order_id).await;
    assert_eq!(order["status"], "pending");
}

#[tokio::test]
async fn webhook_rejects_unknown_orders_providers_and_events() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "wh-reject").await;
    let order_id = order["id"].as_i64().unwrap();

    let unknown_order = post_webhook(
        &app,
        generic_webhook(99_999, "payment_succeeded", None),
        "secret-signature",
    )
    .await;
    assert_eq!(unknown_order.status(), StatusCode::BAD_REQUEST);

    let mut mismatched = generic_webhook(order_id, "payment_succeeded", None);
    mismatched["provider"] = json!("stripe");
    let mismatched = post_webhook(&app, mismatched, "secret-signature").await;
    assert_eq!(mismatched.status(), StatusCode::BAD_REQUEST);

    let unknown_event = post_webhook(
        &app,
        generic_webhook(order_id, "payment_exploded", None),
        "secret-signature",
    )
    .await;
    assert_eq!(unknown_event.status(), StatusCode::BAD_REQUEST);

    let order = fetch_order(&app, order_id).await;
    assert_eq!(order["status"], "pending");
}

#[tokio::test]
async fn refund_applies_only_after_payment() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "wh-refund").await;
    let order_id = order["id"].as_i64().unwrap();

    // Refund before payment is out of order.
    let premature = post_webhook(
        &app,
        generic_webhook(order_id, "payment_refunded", None),
        "secret-signature",
    )
    .await;
    assert_eq!(premature.status(), StatusCode::BAD_REQUEST);

    let paid = post_webhook(
        &app,
        generic_webhook(order_id, "payment_succeeded", Some("pi_refundable")),
        "secret-signature",
    )
    .await;
    assert_eq!(paid.status(), StatusCode::ACCEPTED);

    let refund = post_webhook(
        &app,
        generic_webhook(order_id, "payment_refunded", None),
        "secret-signature",
    )
    .await;
    assert_eq!(refund.status(), StatusCode::ACCEPTED);
    let ack = response_json(refund).await;
    assert_eq!(ack["status"], "refunded");
}

#[tokio::test]
async fn failure_after_payment_is_rejected_and_status_kept() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "wh-regression").await;
    let order_id = order["id"].as_i64().unwrap();

    let paid = post_webhook(
        &app,
        generic_webhook(order_id, "payment_succeeded", Some("pi_kept")),
        "secret-signature",
    )
    .await;
    assert_eq!(paid.status(), StatusCode::ACCEPTED);

    let late_failure = post_webhook(
        &app,
        generic_webhook(order_id, "payment_failed", None),
        "secret-signature",
    )
    .await;
    assert_eq!(late_failure.status(), StatusCode::BAD_REQUEST);

    let order = fetch_order(&app, order_id).await;
    assert_eq!(order["status"], "paid");
}

#[tokio::test]
async fn failed_payment_cancels_pending_order() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "wh-failure").await;
    let order_id = order["id"].as_i64().unwrap();

    let response = post_webhook(
        &app,
        generic_webhook(order_id, "payment_failed", None),
        "secret-signature",
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let ack = response_json(response).await;
    assert_eq!(ack["status"], "cancelled");
}

#[tokio::test]
async fn stripe_webhook_verifies_signature_and_reconciles() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "stripe-success").await;
    let order_id = order["id"].as_i64().unwrap();

    let event = json!({
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_test_123",
                "client_reference_id": order_id.to_string(),
                "metadata": { "order_id": order_id.to_string() },
                "payment_intent": "pi_stripe_42",
            }
        }
    });
    let body = serde_json::to_vec(&event).unwrap();
    let signature = stripe_signature("whsec_test", &body);

    let response = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/stripe/webhook",
            Some(event.clone()),
            &[("stripe-signature", &signature)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let ack = response_json(response).await;
    assert_eq!(ack["status"], "paid");
    assert_eq!(ack["order_id"], order_id);

    let order = fetch_order(&app, order_id).await;
    assert_eq!(order["status"], "paid");
    assert_eq!(order["payment_reference"], "pi_stripe_42");

    // Tampered signature is refused.
    let forged = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/stripe/webhook",
            Some(event),
            &[("stripe-signature", "t=0,v1=deadbeef")],
        )
        .await;
    assert_eq!(forged.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stripe_webhook_requires_an_order_reference() {
    let app = TestApp::new().await;
    let _ = seed_pending_order(&app, "stripe-no-ref").await;

    let event = json!({
        "type": "checkout.session.completed",
        "data": { "object": { "id": "cs_test_ref_less" } }
    });
    let body = serde_json::to_vec(&event).unwrap();
    let signature = stripe_signature("whsec_test", &body);

    let response = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/stripe/webhook",
            Some(event),
            &[("stripe-signature", &signature)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stripe_refund_event_reconciles_paid_order() {
    let app = TestApp::new().await;
    let order = seed_pending_order(&app, "stripe-refund").await;
    let order_id = order["id"].as_i64().unwrap();

    let paid = post_webhook(
        &app,
        generic_webhook(order_id, "payment_succeeded", Some("pi_before_refund")),
        "secret-signature",
    )
    .await;
    assert_eq!(paid.status(), StatusCode::ACCEPTED);

    let event = json!({
        "type": "charge.refunded",
        "data": { "object": { "metadata": { "order_id": order_id.to_string() } } }
    });
    let body = serde_json::to_vec(&event).unwrap();
    let signature = stripe_signature("whsec_test", &body);

    let response = app
        .request_anonymous(
            Method::POST,
            "/api/v1/payments/stripe/webhook",
            Some(event),
            &[("stripe-signature", &signature)],
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let ack = response_json(response).await;
    assert_eq!(ack["status"], "refunded");
}
