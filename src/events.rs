use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::entities::order::OrderStatus;

/// Domain events emitted by the order and payment services. Delivery is
/// best-effort: a full or closed channel is logged and dropped, never
/// surfaced to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: i64,
        user_id: i64,
        total_amount_cents: i64,
    },
    OrderStatusChanged {
        order_id: i64,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentSessionOpened {
        order_id: i64,
        provider: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!(error = %e, "failed to send event");
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Background consumer logging events; downstream integrations (email,
/// analytics) subscribe here.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                user_id,
                total_amount_cents,
            } => {
                info!(order_id, user_id, total_amount_cents, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id, %old_status, %new_status, "order status changed");
            }
            Event::PaymentSessionOpened { order_id, provider } => {
                info!(order_id, %provider, "payment session opened");
            }
        }
    }
    info!("event channel closed; processor exiting");
}
