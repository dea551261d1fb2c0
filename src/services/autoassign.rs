//! Entry points that turn store events and operator requests into
//! allocation passes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::errors::ServiceError;
use crate::events::{self, AssignTrigger, Event, EventSender};
use crate::models::{
    AssignCursor, DemandOrder, LocationId, MoveId, MoveState, PoolScope, ProductId, ShipmentId,
    SupplyKey,
};
use crate::services::allocator::AllocationOutcome;
use crate::services::demand::{DemandQueue, ShipmentDemand};
use crate::services::location_tree::LocationTree;
use crate::services::lock_gate::LockBackoffGate;
use crate::services::pass::{AllocationPass, AssignOptions};
use crate::services::scheduler::{BatchCursorScheduler, SweepReport, SweepScope};
use crate::store::{ShipmentFilter, StockStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssignReport {
    pub considered: usize,
    pub assigned: Vec<ShipmentId>,
    pub rejected: Vec<ShipmentId>,
    /// Not waiting, or unknown, by the time the pass looked at them.
    pub skipped: Vec<ShipmentId>,
    pub failed: Vec<(ShipmentId, String)>,
}

/// Operator selection for previewing or bulk-assigning the backlog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualSelection {
    pub warehouses: Vec<LocationId>,
    /// Only shipments changed at or after this instant.
    pub updated_since: Option<DateTime<Utc>>,
    /// Ignore stock moves dated before this day.
    pub stock_from: Option<NaiveDate>,
}

impl ManualSelection {
    pub fn warehouse(warehouse: LocationId) -> Self {
        Self {
            warehouses: vec![warehouse],
            ..Self::default()
        }
    }

    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.updated_since = since;
        self
    }

    fn filter(&self) -> ShipmentFilter {
        ShipmentFilter::waiting()
            .with_warehouses(self.warehouses.clone())
            .updated_since(self.updated_since)
            .ordered_by(DemandOrder::CreatedAt)
    }
}

pub struct AutoAssignService {
    store: Arc<dyn StockStore>,
    gate: LockBackoffGate,
    options: AssignOptions,
    events: Option<EventSender>,
}

impl AutoAssignService {
    pub fn new(store: Arc<dyn StockStore>, gate: LockBackoffGate, options: AssignOptions) -> Self {
        Self {
            store,
            gate,
            options,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn options(&self) -> AssignOptions {
        self.options
    }

    async fn tree(&self) -> Result<LocationTree, ServiceError> {
        Ok(LocationTree::new(self.store.locations().await?))
    }

    /// Shipments just entered `waiting`. Does nothing unless the settings
    /// record enables assignment on wait.
    #[instrument(skip(self))]
    pub async fn on_shipments_waiting(
        &self,
        ids: &[ShipmentId],
    ) -> Result<AssignReport, ServiceError> {
        let settings = self.store.load_settings().await?;
        if !settings.try_wait_to_assign {
            debug!("assignment on wait disabled");
            return Ok(AssignReport::default());
        }
        self.assign_each(ids, AssignTrigger::Waiting).await
    }

    /// Attempts the given shipments one by one regardless of settings.
    #[instrument(skip(self))]
    pub async fn try_assign(&self, ids: &[ShipmentId]) -> Result<AssignReport, ServiceError> {
        self.assign_each(ids, AssignTrigger::Manual).await
    }

    async fn assign_each(
        &self,
        ids: &[ShipmentId],
        trigger: AssignTrigger,
    ) -> Result<AssignReport, ServiceError> {
        let mut report = AssignReport {
            considered: ids.len(),
            ..AssignReport::default()
        };
        if ids.is_empty() {
            return Ok(report);
        }

        let tree = self.tree().await?;
        let pass = AllocationPass::new(
            self.store.as_ref(),
            &tree,
            self.options,
            self.options.window(None),
        );
        let shipments = self
            .store
            .shipments(&ShipmentFilter::waiting().with_ids(ids.to_vec()))
            .await?;
        let queue = pass.queue(shipments);
        let queued: BTreeSet<ShipmentId> = queue.shipment_ids().into_iter().collect();
        report.skipped = ids.iter().copied().filter(|id| !queued.contains(id)).collect();

        // each shipment gets a pool that already reflects the ones before it
        for demand in queue {
            let id = demand.shipment_id;
            let single = DemandQueue::from_demands(vec![demand.clone()]);
            let outcome = match pass.evaluate(&single).await {
                Ok((outcome, _)) => outcome,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(shipment_id = id, error = %err, "could not evaluate shipment");
                    report.failed.push((id, err.to_string()));
                    continue;
                }
            };
            if !outcome.is_accepted(id) {
                report.rejected.push(id);
                continue;
            }
            self.commit_one(&demand, trigger, &mut report).await?;
        }

        info!(
            %trigger,
            assigned = report.assigned.len(),
            rejected = report.rejected.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "assignment attempt finished"
        );
        Ok(report)
    }

    /// Commits one accepted shipment on its own, recording rather than
    /// propagating non-fatal failures.
    async fn commit_one(
        &self,
        demand: &ShipmentDemand,
        trigger: AssignTrigger,
        report: &mut AssignReport,
    ) -> Result<(), ServiceError> {
        let id = demand.shipment_id;
        match self.store.commit_assignments(None, &[id]).await {
            Ok(committed) => {
                for failed in &committed.failed {
                    self.emit(Event::AssignmentFailed {
                        shipment_id: failed.0,
                        reason: failed.1.clone(),
                    })
                    .await;
                }
                for assigned in &committed.assigned {
                    self.assigned(*assigned, demand.warehouse_id, trigger).await;
                }
                report.assigned.extend(committed.assigned);
                report.skipped.extend(committed.skipped);
                report.failed.extend(committed.failed);
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(shipment_id = id, error = %err, "assignment commit failed");
                self.emit(Event::AssignmentFailed {
                    shipment_id: id,
                    reason: err.to_string(),
                })
                .await;
                report.failed.push((id, err.to_string()));
                Ok(())
            }
        }
    }

    /// Inbound moves completed: re-check waiting shipments that draw on the
    /// storage roots and products the receipts touched. Only done moves of
    /// inbound shipments count as receipts.
    #[instrument(skip(self))]
    pub async fn on_inbound_received(
        &self,
        move_ids: &[MoveId],
    ) -> Result<AssignReport, ServiceError> {
        let tree = self.tree().await?;
        let done: Vec<_> = self
            .store
            .moves(move_ids)
            .await?
            .into_iter()
            .filter(|mv| mv.state == MoveState::Done)
            .collect();
        let owners: Vec<ShipmentId> = done
            .iter()
            .filter_map(|mv| mv.shipment_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let inbound: BTreeSet<ShipmentId> = if owners.is_empty() {
            BTreeSet::new()
        } else {
            self.store
                .shipments(&ShipmentFilter::inbound(owners))
                .await?
                .into_iter()
                .map(|s| s.id)
                .collect()
        };
        let keys: BTreeSet<SupplyKey> = done
            .iter()
            .filter(|mv| mv.shipment_id.map_or(false, |id| inbound.contains(&id)))
            .filter_map(|mv| {
                tree.storage_root_of(mv.to_location_id)
                    .map(|root| (root, mv.product_id))
            })
            .collect();
        if keys.is_empty() {
            debug!("no inbound receipt reached a storage location");
            return Ok(AssignReport::default());
        }
        let products: Vec<ProductId> = keys
            .iter()
            .map(|(_, product)| *product)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        // receipts are keyed by storage root, so demand must be too
        let options = AssignOptions {
            scope: PoolScope::WarehouseStorage,
            order: DemandOrder::PlannedDate,
            ..self.options
        };
        let pass = AllocationPass::new(self.store.as_ref(), &tree, options, options.window(None));
        let shipments = self
            .store
            .shipments(
                &ShipmentFilter::waiting()
                    .with_products(products)
                    .ordered_by(DemandOrder::PlannedDate),
            )
            .await?;
        let mut queue = pass.queue(shipments);
        queue.retain_touching(&keys);

        let mut report = AssignReport {
            considered: queue.len(),
            ..AssignReport::default()
        };
        if queue.is_empty() {
            return Ok(report);
        }
        let (outcome, _) = pass.evaluate(&queue).await?;
        report.rejected = outcome.rejected.clone();
        for demand in queue.iter().filter(|d| outcome.is_accepted(d.shipment_id)) {
            self.commit_one(demand, AssignTrigger::Inbound, &mut report)
                .await?;
        }
        info!(
            keys = keys.len(),
            assigned = report.assigned.len(),
            rejected = report.rejected.len(),
            "receipt-triggered assignment finished"
        );
        Ok(report)
    }

    /// Evaluates the selection without writing anything.
    #[instrument(skip(self))]
    pub async fn preview_assignable(
        &self,
        selection: &ManualSelection,
    ) -> Result<AllocationOutcome, ServiceError> {
        let (outcome, _) = self.evaluate_selection(selection).await?;
        Ok(outcome)
    }

    async fn evaluate_selection(
        &self,
        selection: &ManualSelection,
    ) -> Result<(AllocationOutcome, HashMap<ShipmentId, LocationId>), ServiceError> {
        let tree = self.tree().await?;
        let options = AssignOptions {
            order: DemandOrder::CreatedAt,
            ..self.options
        };
        let pass = AllocationPass::new(
            self.store.as_ref(),
            &tree,
            options,
            options.window(selection.stock_from),
        );
        let queue = pass.queue(self.store.shipments(&selection.filter()).await?);
        let warehouses = queue
            .iter()
            .map(|d| (d.shipment_id, d.warehouse_id))
            .collect();
        let (outcome, _) = pass.evaluate(&queue).await?;
        Ok((outcome, warehouses))
    }

    /// Commits everything the preview of `selection` accepts, in one
    /// transaction with per-shipment isolation.
    #[instrument(skip(self))]
    pub async fn assign_selected(
        &self,
        selection: &ManualSelection,
    ) -> Result<AssignReport, ServiceError> {
        self.gate.wait_until_clear().await?;
        let (outcome, warehouses) = self.evaluate_selection(selection).await?;
        let committed = self
            .store
            .commit_assignments(None, &outcome.accepted)
            .await?;
        for id in &committed.assigned {
            let warehouse = warehouses.get(id).copied().unwrap_or_default();
            self.assigned(*id, warehouse, AssignTrigger::Manual).await;
        }
        Ok(AssignReport {
            considered: outcome.accepted.len() + outcome.rejected.len(),
            assigned: committed.assigned,
            rejected: outcome.rejected,
            skipped: committed.skipped,
            failed: committed.failed,
        })
    }

    /// One scheduled sweep over the waiting backlog.
    pub async fn run_sweep(&self, scope: &SweepScope) -> Result<SweepReport, ServiceError> {
        let mut scheduler =
            BatchCursorScheduler::new(self.store.clone(), self.gate.clone(), self.options);
        if let Some(events) = &self.events {
            scheduler = scheduler.with_events(events.clone());
        }
        let report = scheduler.run(scope).await?;
        self.emit(Event::SweepCompleted {
            blocks: report.blocks,
            assigned: report.assigned.len(),
            rejected: report.rejected.len(),
            cursor: report.cursor,
        })
        .await;
        Ok(report)
    }

    pub async fn cursor(&self) -> Result<AssignCursor, ServiceError> {
        Ok(self.store.load_settings().await?.cursor)
    }

    /// Forgets the sweep position; the next sweep rescans the backlog.
    pub async fn reset_cursor(&self) -> Result<(), ServiceError> {
        self.store.save_cursor(&AssignCursor::default()).await
    }

    async fn assigned(
        &self,
        shipment_id: ShipmentId,
        warehouse_id: LocationId,
        trigger: AssignTrigger,
    ) {
        events::record_assignment(self.events.as_ref(), shipment_id, warehouse_id, trigger).await;
    }

    async fn emit(&self, event: Event) {
        events::emit(self.events.as_ref(), event).await;
    }
}
