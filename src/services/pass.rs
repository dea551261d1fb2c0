//! One allocation pass: queue -> pool -> greedy match.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::errors::ServiceError;
use crate::models::{DemandOrder, PoolScope, Shipment};
use crate::services::allocator::{allocate, AllocationOutcome};
use crate::services::demand::{DemandQueue, DemandQueueBuilder};
use crate::services::location_tree::LocationTree;
use crate::services::supply::{SupplyAggregator, SupplyPool};
use crate::store::{StockStore, StockWindow};

/// How a pass keys, orders and prices demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignOptions {
    pub scope: PoolScope,
    pub order: DemandOrder,
    /// Count in-transit inbound stock as available.
    pub forecast: bool,
}

impl AssignOptions {
    pub fn window(&self, start: Option<NaiveDate>) -> StockWindow {
        StockWindow {
            forecast: self.forecast,
            ..StockWindow::today().with_start(start)
        }
    }
}

pub struct AllocationPass<'a, S: ?Sized> {
    store: &'a S,
    tree: &'a LocationTree,
    options: AssignOptions,
    window: StockWindow,
}

impl<'a, S: StockStore + ?Sized> AllocationPass<'a, S> {
    pub fn new(
        store: &'a S,
        tree: &'a LocationTree,
        options: AssignOptions,
        window: StockWindow,
    ) -> Self {
        Self {
            store,
            tree,
            options,
            window,
        }
    }

    pub fn queue(&self, shipments: Vec<Shipment>) -> DemandQueue {
        DemandQueueBuilder::new(self.tree, self.options.scope, self.options.order).build(shipments)
    }

    /// Builds a fresh pool for the queue's keys and matches the queue against it.
    #[instrument(skip(self, queue), fields(shipments = queue.len()))]
    pub async fn evaluate(
        &self,
        queue: &DemandQueue,
    ) -> Result<(AllocationOutcome, SupplyPool), ServiceError> {
        let keys = queue.keys();
        let mut pool = SupplyAggregator::new(self.store)
            .pool(self.tree, &keys, &self.window)
            .await?;
        let outcome = allocate(queue, &mut pool);
        debug!(keys = keys.len(), "pass evaluated");
        Ok((outcome, pool))
    }
}
