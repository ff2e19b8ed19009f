use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::IntoParams;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::CreateOrderRequest,
    AppState,
};

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListOrdersQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

/// Creates an order from the caller's line items.
///
/// The `Idempotency-Key` header is required; replaying the same key returns
/// the previously created order with a 200 instead of a 201.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = crate::services::orders::OrderResponse),
        (status = 200, description = "Idempotent replay of an existing order", body = crate::services::orders::OrderResponse),
        (status = 400, description = "Validation failure", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
#[instrument(skip(state, headers, request), fields(user_id = user.user_id))]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ServiceError::OrderValidation("Idempotency-Key header is required".to_string())
        })?;

    let (order, created) = state
        .services
        .orders
        .create_order(user.user_id, request, idempotency_key, Some("manual"))
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(order)))
}

/// Lists the caller's orders, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Orders for the caller", body = crate::services::orders::OrderListResponse),
    ),
    tag = "orders"
)]
#[instrument(skip(state), fields(user_id = user.user_id))]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders(user.user_id, query.page, query.per_page)
        .await?;
    Ok(Json(orders))
}

/// Fetches one of the caller's orders.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = i64, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order detail", body = crate::services::orders::OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
#[instrument(skip(state), fields(user_id = user.user_id))]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(user.user_id, order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
    Ok(Json(order))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
}
