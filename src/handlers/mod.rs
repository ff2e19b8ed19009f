use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{orders::OrderService, payments::PaymentService, stock::StockLedger},
};

pub mod orders;
pub mod payment_webhooks;
pub mod payments;

/// Shared service registry handed to every handler through `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        config: &AppConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Result<Self, ServiceError> {
        let orders = Arc::new(OrderService::new(
            db.clone(),
            StockLedger::default(),
            event_sender.clone(),
        ));
        let stripe = PaymentService::stripe_from_config(config)?;
        let payments = Arc::new(PaymentService::new(
            db,
            orders.clone(),
            stripe,
            event_sender,
        ));
        Ok(Self { orders, payments })
    }
}
