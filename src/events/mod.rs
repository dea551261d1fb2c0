use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::{AssignCursor, LocationId, ShipmentId};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Which trigger produced an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AssignTrigger {
    Waiting,
    Inbound,
    Manual,
    Sweep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ShipmentAssigned {
        shipment_id: ShipmentId,
        warehouse_id: LocationId,
        trigger: AssignTrigger,
        at: DateTime<Utc>,
    },
    AssignmentFailed {
        shipment_id: ShipmentId,
        reason: String,
    },
    SweepCompleted {
        blocks: u32,
        assigned: usize,
        rejected: usize,
        cursor: AssignCursor,
    },
}

/// Sends `event` if a sender is configured; a closed channel only logs.
pub async fn emit(events: Option<&EventSender>, event: Event) {
    if let Some(events) = events {
        if let Err(e) = events.send(event).await {
            warn!("dropping event: {}", e);
        }
    }
}

/// Counts one committed assignment under its trigger and announces it.
pub async fn record_assignment(
    events: Option<&EventSender>,
    shipment_id: ShipmentId,
    warehouse_id: LocationId,
    trigger: AssignTrigger,
) {
    counter!("autoassign.shipments.assigned", 1, "trigger" => trigger.to_string());
    emit(
        events,
        Event::ShipmentAssigned {
            shipment_id,
            warehouse_id,
            trigger,
            at: Utc::now(),
        },
    )
    .await;
}

/// Drains the channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::ShipmentAssigned {
                shipment_id,
                warehouse_id,
                trigger,
                at,
            } => {
                info!(shipment_id, warehouse_id, %trigger, %at, "shipment assigned");
            }
            Event::AssignmentFailed {
                shipment_id,
                reason,
            } => {
                warn!(shipment_id, %reason, "shipment assignment failed");
            }
            Event::SweepCompleted {
                blocks,
                assigned,
                rejected,
                cursor,
            } => {
                info!(
                    blocks,
                    assigned,
                    rejected,
                    next_id = cursor.next_id,
                    last_id = cursor.last_id,
                    "sweep completed"
                );
            }
        }
    }

    info!("Event processing loop finished");
}
