use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Events emitted after committed ledger mutations. Consumers (reporting,
/// external job triggers) subscribe out-of-band; the core never reads these
/// back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    MovementPublished {
        movement_id: Uuid,
        movement_type: String,
        line_count: usize,
    },
    MovementVoided {
        movement_id: Uuid,
        movement_type: String,
    },
    AverageCostOverridden {
        item_id: Uuid,
        warehouse_id: Uuid,
        previous_cost: Decimal,
        new_cost: Decimal,
    },
    CostsRecalculated {
        warehouse_id: Option<Uuid>,
        corrected_positions: u64,
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
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging each event. Runs until every sender is
/// dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::MovementPublished {
                movement_id,
                movement_type,
                line_count,
            } => info!(
                %movement_id,
                %movement_type,
                line_count,
                "movement published"
            ),
            Event::MovementVoided {
                movement_id,
                movement_type,
            } => info!(%movement_id, %movement_type, "movement voided"),
            Event::AverageCostOverridden {
                item_id,
                warehouse_id,
                previous_cost,
                new_cost,
            } => info!(
                %item_id,
                %warehouse_id,
                %previous_cost,
                %new_cost,
                "average cost overridden"
            ),
            Event::CostsRecalculated {
                warehouse_id,
                corrected_positions,
            } => info!(
                ?warehouse_id,
                corrected_positions,
                "cost recalculation completed"
            ),
        }
    }
}
