//! In-process domain events emitted by the movement processor.
//!
//! Events are advisory: the ledger write has already committed by the time an
//! event is published, so consumers must treat them as notifications, not as
//! the source of truth.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Events that can occur in the stock ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A movement was applied and the product aggregate resynchronized.
    StockMovementRecorded {
        tenant_id: Uuid,
        transfer_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        movement_type: String,
        quantity: i32,
        product_total: i32,
    },
}

/// Consumes events from the channel until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockMovementRecorded {
                tenant_id,
                transfer_id,
                product_id,
                location_id,
                movement_type,
                quantity,
                product_total,
            } => {
                info!(
                    tenant_id = %tenant_id,
                    transfer_id = %transfer_id,
                    product_id = %product_id,
                    location_id = %location_id,
                    movement_type = %movement_type,
                    quantity = %quantity,
                    product_total = %product_total,
                    "Stock movement recorded"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_fails_once_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let sender = EventSender::new(tx);
        let result = sender
            .send(Event::StockMovementRecorded {
                tenant_id: Uuid::new_v4(),
                transfer_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                location_id: Uuid::new_v4(),
                movement_type: "IN".into(),
                quantity: 1,
                product_total: 1,
            })
            .await;
        assert!(result.is_err());
    }
}
