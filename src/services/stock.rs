use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::warn;

use crate::{entities::product, errors::ServiceError};

/// Result of a stock reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    Insufficient,
}

/// Stock ledger over the `products.stock` column.
///
/// Reservation is a guarded decrement executed on the caller's connection so
/// it participates in the order-creation transaction; the `stock >= quantity`
/// predicate makes concurrent purchases of the same product serialize at the
/// store instead of racing in application code.
#[derive(Debug, Clone, Default)]
pub struct StockLedger;

impl StockLedger {
    pub fn new() -> Self {
        Self
    }

    /// Decrements `quantity` units from the product's stock.
    ///
    /// Returns `Insufficient` without modifying anything when stock is too
    /// low (or the product row vanished concurrently).
    pub async fn reserve<C>(
        &self,
        conn: &C,
        product_id: i64,
        quantity: i32,
    ) -> Result<ReserveOutcome, ServiceError>
    where
        C: ConnectionTrait,
    {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(product_id, quantity, "stock reservation failed");
            counter!("stock_reservations_failed_total", 1);
            return Ok(ReserveOutcome::Insufficient);
        }

        counter!("stock_reservations_total", 1);
        Ok(ReserveOutcome::Reserved)
    }
}
