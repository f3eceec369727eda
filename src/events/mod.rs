use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the order and payment flow. Delivery is fire-and-forget;
/// a send failure never fails the request that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentIntentCreated {
        intent_id: String,
        amount_minor: i64,
        currency: String,
    },
    PaymentVerified {
        order_id: Uuid,
        gateway_payment_id: String,
    },
    PaymentVerificationRejected {
        gateway_order_id: String,
    },
    StockAdjusted {
        product_id: Uuid,
        delta: i32,
    },
    OrderDelivered {
        order_id: Uuid,
        total_price: Decimal,
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

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }
}

/// Consumes events from the channel for the lifetime of the process,
/// recording them as structured log entries.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::PaymentVerificationRejected { gateway_order_id } => {
                warn!(gateway_order_id = %gateway_order_id, "Payment verification rejected");
            }
            other => {
                info!(event = ?other, "Event processed");
            }
        }
    }
    info!("Event channel closed; processor exiting");
}
