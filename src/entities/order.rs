use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Order state machine:
/// `Draft -> Pending -> Paid -> {Shipped -> Completed} | Cancelled | Refunded`.
/// Completed, Cancelled and Refunded are terminal for payment reconciliation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Whether a payment session may still be opened for this order.
    pub fn accepts_payment_session(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Draft)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment-provider event kinds that drive order status transitions. Both the
/// generic webhook and the Stripe webhook converge on this type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentEvent {
    Succeeded,
    Failed,
    Refunded,
}

impl PaymentEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEvent::Succeeded => "payment_succeeded",
            PaymentEvent::Failed => "payment_failed",
            PaymentEvent::Refunded => "payment_refunded",
        }
    }
}

impl fmt::Display for PaymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of applying a payment event to the current order status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusTransition {
    /// Persist the new status.
    Apply(OrderStatus),
    /// The event re-states the current status; acknowledge without writing.
    AlreadyApplied,
    /// Out-of-order or regressive event; reject so the provider retries
    /// against an operator-visible error instead of silently regressing.
    Rejected,
}

impl OrderStatus {
    /// Transition table `{current status x payment event -> outcome}`.
    ///
    /// A duplicate delivery of the event that produced the current status is
    /// idempotent. A `Failed` event arriving after the order was paid is
    /// rejected rather than regressing the order to cancelled.
    pub fn apply_payment_event(self, event: PaymentEvent) -> StatusTransition {
        match (self, event) {
            (OrderStatus::Draft | OrderStatus::Pending, PaymentEvent::Succeeded) => {
                StatusTransition::Apply(OrderStatus::Paid)
            }
            (OrderStatus::Paid, PaymentEvent::Succeeded) => StatusTransition::AlreadyApplied,

            (OrderStatus::Draft | OrderStatus::Pending, PaymentEvent::Failed) => {
                StatusTransition::Apply(OrderStatus::Cancelled)
            }
            (OrderStatus::Cancelled, PaymentEvent::Failed) => StatusTransition::AlreadyApplied,

            (OrderStatus::Paid, PaymentEvent::Refunded) => {
                StatusTransition::Apply(OrderStatus::Refunded)
            }
            (OrderStatus::Refunded, PaymentEvent::Refunded) => StatusTransition::AlreadyApplied,

            _ => StatusTransition::Rejected,
        }
    }
}

/// Order header. Created once by the order assembler; afterwards only the
/// status and payment reference fields change.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub user_id: i64,
    pub status: OrderStatus,

    /// ISO 4217 code; fixed to EUR at creation time.
    pub currency: String,

    pub total_amount_cents: i64,
    pub total_items: i32,
    pub total_impact_co2_g: i64,

    /// Provider-assigned identifier (checkout session or settlement id).
    pub payment_reference: Option<String>,
    pub payment_provider: Option<String>,

    /// Client-supplied token making order creation retry-safe. Globally
    /// unique at the persistence layer.
    pub idempotency_key: Option<String>,

    pub placed_at: Option<DateTime<Utc>>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLines,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLines.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if insert {
            active_model.created_at = Set(Utc::now());
        }
        active_model.updated_at = Set(Utc::now());
        Ok(active_model)
    }
}
