//! Greedy all-or-nothing matching of the demand queue against a supply pool.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, trace};

use crate::models::{ShipmentId, SupplyKey};
use crate::services::demand::{DemandQueue, ShipmentDemand};
use crate::services::supply::SupplyPool;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllocationOutcome {
    /// Accepted shipments in service order.
    pub accepted: Vec<ShipmentId>,
    pub rejected: Vec<ShipmentId>,
}

impl AllocationOutcome {
    pub fn is_accepted(&self, shipment: ShipmentId) -> bool {
        self.accepted.contains(&shipment)
    }
}

/// Walks the queue once in order. A shipment is accepted only when every
/// supply key it touches covers the shipment's total demand on that key;
/// acceptance consumes the pool before the next shipment is looked at.
pub fn allocate(queue: &DemandQueue, pool: &mut SupplyPool) -> AllocationOutcome {
    let mut outcome = AllocationOutcome::default();
    for demand in queue.iter() {
        if try_reserve(demand, pool) {
            trace!(shipment_id = demand.shipment_id, "accepted");
            outcome.accepted.push(demand.shipment_id);
        } else {
            trace!(shipment_id = demand.shipment_id, "rejected");
            outcome.rejected.push(demand.shipment_id);
        }
    }
    debug!(
        accepted = outcome.accepted.len(),
        rejected = outcome.rejected.len(),
        "allocation pass finished"
    );
    outcome
}

/// Checks and, on success, consumes one shipment's demand.
pub fn try_reserve(demand: &ShipmentDemand, pool: &mut SupplyPool) -> bool {
    let mut needed: BTreeMap<SupplyKey, Decimal> = BTreeMap::new();
    for line in &demand.lines {
        *needed.entry(line.key()).or_insert(Decimal::ZERO) += line.quantity;
    }
    // an absent key reads as zero, so any positive demand on it fails here
    let satisfiable = needed
        .iter()
        .all(|(key, quantity)| *quantity <= Decimal::ZERO || *quantity <= pool.available(key));
    if !satisfiable {
        return false;
    }
    for (key, quantity) in &needed {
        pool.consume(key, *quantity);
    }
    true
}
