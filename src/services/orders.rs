use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus},
    entities::order_line::{self, Entity as OrderLineEntity, Model as OrderLineModel},
    entities::product::{self, Entity as ProductEntity, Model as ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock::{ReserveOutcome, StockLedger},
};

/// Placeholder emitted by HTTP clients with unresolved templating variables.
/// Treated as "no real key supplied": replaced by a fresh unique value,
/// deliberately disabling idempotency for that single call.
const IDEMPOTENCY_KEY_PLACEHOLDER: &str = "{{$uuid}}";

/// Request/response types for the order service

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemInput {
    pub product_id: i64,
    #[validate(range(min = 1, max = 100, message = "Quantity must be between 1 and 100"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order requires at least one product"))]
    pub items: Vec<OrderItemInput>,
    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderLineResponse {
    pub id: i64,
    pub product_id: Option<i64>,
    pub product_title: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_price_cents: Option<i64>,
    pub subtotal_cents: i64,
    pub impact_co2_g: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: i64,
    pub status: OrderStatus,
    pub currency: String,
    pub total_amount_cents: i64,
    pub total_items: i32,
    pub total_impact_co2_g: i64,
    pub payment_reference: Option<String>,
    pub payment_provider: Option<String>,
    pub idempotency_key: Option<String>,
    pub placed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<OrderLineResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Priced snapshot of one requested line, computed before any row is written.
struct PricedLine {
    product_id: i64,
    product_title: String,
    quantity: i32,
    unit_price_cents: i64,
    reference_price_cents: Option<i64>,
    subtotal_cents: i64,
    impact_co2_g: Option<i64>,
}

fn price_line(product: &ProductModel, quantity: i32) -> PricedLine {
    let unit_price_cents = product.sale_price_cents();
    let reference_price_cents = product.promo_price_cents.map(|_| product.price_cents);
    let subtotal_cents = unit_price_cents * i64::from(quantity);
    let co2 = product.impact_co2_g.unwrap_or(0) * i64::from(quantity);

    PricedLine {
        product_id: product.id,
        product_title: product.title.clone(),
        quantity,
        unit_price_cents,
        reference_price_cents,
        subtotal_cents,
        impact_co2_g: (co2 != 0).then_some(co2),
    }
}

/// Validates and normalizes a client-supplied idempotency key.
fn normalize_idempotency_key(key: &str) -> Result<String, ServiceError> {
    if key.trim().is_empty() {
        return Err(ServiceError::OrderValidation(
            "Idempotency-Key header is required".to_string(),
        ));
    }
    if key == IDEMPOTENCY_KEY_PLACEHOLDER {
        return Ok(Uuid::new_v4().simple().to_string());
    }
    Ok(key.to_string())
}

fn is_unique_violation(err: &ServiceError) -> bool {
    matches!(
        err,
        ServiceError::DatabaseError(db_err)
            if matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
    )
}

/// Service assembling orders: validates requested lines against the catalog,
/// snapshots pricing, and persists order, lines and stock decrements in one
/// transaction. The only code path that decrements stock or creates orders.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    stock: StockLedger,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, stock: StockLedger, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db,
            stock,
            event_sender,
        }
    }

    /// Creates a new order, or returns the existing one when the idempotency
    /// key was already used by this user.
    ///
    /// Returns `(order, created)`; `created == false` means an idempotent
    /// replay that performed no writes.
    #[instrument(skip(self, request), fields(user_id = user_id, items = request.items.len()))]
    pub async fn create_order(
        &self,
        user_id: i64,
        request: CreateOrderRequest,
        idempotency_key: &str,
        payment_provider: Option<&str>,
    ) -> Result<(OrderResponse, bool), ServiceError> {
        let key = normalize_idempotency_key(idempotency_key)?;

        // Replay check comes first: a retry of an already-created order must
        // succeed regardless of what payload accompanies it.
        if let Some(existing) = self.find_by_idempotency_key(user_id, &key).await? {
            info!(order_id = existing.id, "idempotent replay, returning existing order");
            return Ok((existing, false));
        }

        request
            .validate()
            .map_err(|e| ServiceError::OrderValidation(e.to_string()))?;
        for item in &request.items {
            item.validate()
                .map_err(|e| ServiceError::OrderValidation(e.to_string()))?;
        }

        match self
            .assemble_order(user_id, &request, &key, payment_provider)
            .await
        {
            Ok(order) => {
                counter!("orders_created_total", 1);
                if let Some(sender) = &self.event_sender {
                    sender
                        .send(Event::OrderCreated {
                            order_id: order.id,
                            user_id,
                            total_amount_cents: order.total_amount_cents,
                        })
                        .await;
                }
                Ok((order, true))
            }
            // A concurrent request with the same key won the insert race; the
            // unique index is the arbiter. Re-read instead of surfacing the
            // raw conflict.
            Err(err) if is_unique_violation(&err) => {
                warn!(user_id, "idempotency key conflict at insert, re-reading");
                match self.find_by_idempotency_key(user_id, &key).await? {
                    Some(existing) => Ok((existing, false)),
                    None => Err(ServiceError::Conflict(
                        "Idempotency key is already in use".to_string(),
                    )),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Runs the full assembly inside one transaction: availability and stock
    /// checks, order + line insertion, stock decrement. Any error rolls the
    /// whole transaction back leaving stock and orders untouched.
    async fn assemble_order(
        &self,
        user_id: i64,
        request: &CreateOrderRequest,
        idempotency_key: &str,
        payment_provider: Option<&str>,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let requested_ids: BTreeSet<i64> = request.items.iter().map(|i| i.product_id).collect();

        let products: HashMap<i64, ProductModel> = ProductEntity::find()
            .filter(product::Column::Id.is_in(requested_ids.iter().copied()))
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let missing: Vec<i64> = requested_ids
            .iter()
            .copied()
            .filter(|id| !products.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::ProductUnavailable(format!(
                "Products not found: {missing:?}"
            )));
        }

        // Availability before stock sufficiency, first failing product wins.
        for item in &request.items {
            let product = &products[&item.product_id];
            if !product.is_purchasable() {
                return Err(ServiceError::ProductUnavailable(format!(
                    "Product {} is not available for purchase",
                    product.id
                )));
            }
            if product.stock < item.quantity {
                return Err(ServiceError::OutOfStock(format!(
                    "Product {} has insufficient stock",
                    product.id
                )));
            }
        }

        let mut total_amount_cents: i64 = 0;
        let mut total_items: i32 = 0;
        let mut total_impact_co2_g: i64 = 0;
        let priced: Vec<PricedLine> = request
            .items
            .iter()
            .map(|item| price_line(&products[&item.product_id], item.quantity))
            .collect();
        for line in &priced {
            total_amount_cents += line.subtotal_cents;
            total_items += line.quantity;
            total_impact_co2_g += line.impact_co2_g.unwrap_or(0);
        }

        let now = Utc::now();
        let order = order::ActiveModel {
            user_id: Set(user_id),
            status: Set(OrderStatus::Pending),
            currency: Set("EUR".to_string()),
            total_amount_cents: Set(total_amount_cents),
            total_items: Set(total_items),
            total_impact_co2_g: Set(total_impact_co2_g),
            payment_provider: Set(payment_provider.map(str::to_string)),
            payment_reference: Set(None),
            idempotency_key: Set(Some(idempotency_key.to_string())),
            placed_at: Set(Some(now)),
            notes: Set(request.notes.clone()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        for line in &priced {
            order_line::ActiveModel {
                order_id: Set(order.id),
                product_id: Set(Some(line.product_id)),
                product_title: Set(line.product_title.clone()),
                quantity: Set(line.quantity),
                unit_price_cents: Set(line.unit_price_cents),
                reference_price_cents: Set(line.reference_price_cents),
                subtotal_cents: Set(line.subtotal_cents),
                impact_co2_g: Set(line.impact_co2_g),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            if self.stock.reserve(&txn, line.product_id, line.quantity).await?
                == ReserveOutcome::Insufficient
            {
                return Err(ServiceError::OutOfStock(format!(
                    "Product {} has insufficient stock",
                    line.product_id
                )));
            }
        }

        txn.commit().await?;

        info!(order_id = order.id, total_amount_cents, "order created");
        self.hydrate(order).await
    }

    /// Idempotency guard lookup: existing order for `(user, key)`.
    async fn find_by_idempotency_key(
        &self,
        user_id: i64,
        key: &str,
    ) -> Result<Option<OrderResponse>, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::IdempotencyKey.eq(key))
            .one(&*self.db)
            .await?;

        match order {
            Some(order) => Ok(Some(self.hydrate(order).await?)),
            None => Ok(None),
        }
    }

    /// Retrieves an order scoped to its owner.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        user_id: i64,
        order_id: i64,
    ) -> Result<Option<OrderResponse>, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?;

        match order {
            Some(order) => Ok(Some(self.hydrate(order).await?)),
            None => Ok(None),
        }
    }

    /// Unscoped fetch used by the payment reconciler.
    pub async fn get_order_model(&self, order_id: i64) -> Result<Option<OrderModel>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db).await?)
    }

    /// Lists the caller's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: i64,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            responses.push(self.hydrate(order).await?);
        }

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }

    /// Applies a reconciled status (and optional settlement reference) to an
    /// order. Only the payment reconciler calls this; the transition has
    /// already been validated against the state machine.
    pub async fn update_order_status(
        &self,
        order: OrderModel,
        new_status: OrderStatus,
        reference: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let order_id = order.id;
        let old_status = order.status;

        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        if let Some(reference) = reference {
            active.payment_reference = Set(Some(reference));
        }
        let updated = active.update(&*self.db).await?;

        info!(order_id, %old_status, %new_status, "order status updated");
        if let Some(sender) = &self.event_sender {
            sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status,
                })
                .await;
        }

        Ok(updated)
    }

    /// Loads the immutable line snapshots for an order.
    pub async fn load_lines(&self, order_id: i64) -> Result<Vec<OrderLineModel>, ServiceError> {
        Ok(OrderLineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::Id)
            .all(&*self.db)
            .await?)
    }

    async fn hydrate(&self, order: OrderModel) -> Result<OrderResponse, ServiceError> {
        let lines = self.load_lines(order.id).await?;
        Ok(model_to_response(order, lines))
    }
}

pub(crate) fn model_to_response(order: OrderModel, lines: Vec<OrderLineModel>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        status: order.status,
        currency: order.currency,
        total_amount_cents: order.total_amount_cents,
        total_items: order.total_items,
        total_impact_co2_g: order.total_impact_co2_g,
        payment_reference: order.payment_reference,
        payment_provider: order.payment_provider,
        idempotency_key: order.idempotency_key,
        placed_at: order.placed_at,
        notes: order.notes,
        created_at: order.created_at,
        updated_at: order.updated_at,
        lines: lines
            .into_iter()
            .map(|line| OrderLineResponse {
                id: line.id,
                product_id: line.product_id,
                product_title: line.product_title,
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                reference_price_cents: line.reference_price_cents,
                subtotal_cents: line.subtotal_cents,
                impact_co2_g: line.impact_co2_g,
                created_at: line.created_at,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::product::ProductStatus;

    fn product(id: i64, price: i64, promo: Option<i64>, co2: Option<i64>) -> ProductModel {
        ProductModel {
            id,
            producer_id: 1,
            title: format!("Product {id}"),
            description: None,
            category: None,
            region: None,
            origin: None,
            impact_co2_g: co2,
            price_cents: price,
            promo_price_cents: promo,
            stock: 10,
            status: ProductStatus::Published,
            is_published: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn promo_line_records_reference_price() {
        let line = price_line(&product(1, 500, Some(400), None), 2);
        assert_eq!(line.unit_price_cents, 400);
        assert_eq!(line.reference_price_cents, Some(500));
        assert_eq!(line.subtotal_cents, 800);
    }

    #[test]
    fn regular_line_has_no_reference_price() {
        let line = price_line(&product(2, 1000, None, None), 1);
        assert_eq!(line.unit_price_cents, 1000);
        assert_eq!(line.reference_price_cents, None);
        assert_eq!(line.subtotal_cents, 1000);
    }

    #[test]
    fn co2_impact_scales_with_quantity() {
        let line = price_line(&product(3, 100, None, Some(250)), 4);
        assert_eq!(line.impact_co2_g, Some(1000));

        let line = price_line(&product(4, 100, None, None), 4);
        assert_eq!(line.impact_co2_g, None);
    }

    #[test]
    fn blank_idempotency_key_is_rejected() {
        assert!(matches!(
            normalize_idempotency_key(""),
            Err(ServiceError::OrderValidation(_))
        ));
        assert!(matches!(
            normalize_idempotency_key("   "),
            Err(ServiceError::OrderValidation(_))
        ));
    }

    #[test]
    fn placeholder_key_is_replaced_with_fresh_value() {
        let first = normalize_idempotency_key("{{$uuid}}").unwrap();
        let second = normalize_idempotency_key("{{$uuid}}").unwrap();
        assert_ne!(first, second);
        assert_ne!(first, "{{$uuid}}");
    }

    #[test]
    fn real_key_passes_through_unchanged() {
        assert_eq!(normalize_idempotency_key("order-42").unwrap(), "order-42");
    }
}
