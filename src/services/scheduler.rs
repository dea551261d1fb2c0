//! Periodic sweep over the waiting backlog in resumable id blocks.
//!
//! The cursor `(next_id, last_id]` is stored with the settings record and
//! committed in the same transaction as the block it describes, so an
//! interrupted sweep resumes at the first uncommitted block. Every cursor
//! write is conditional on the value this sweep last saw; a sweep that finds
//! it moved stops and leaves the backlog to whoever moved it.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::errors::ServiceError;
use crate::events::{self, AssignTrigger, Event, EventSender};
use crate::models::{AssignCursor, CursorStep, LocationId, ShipmentId};
use crate::services::location_tree::LocationTree;
use crate::services::lock_gate::LockBackoffGate;
use crate::services::pass::{AllocationPass, AssignOptions};
use crate::store::{ShipmentFilter, StockStore};

/// Restricts a sweep to some warehouses; empty means all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepScope {
    pub warehouses: Vec<LocationId>,
}

impl SweepScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn warehouses(warehouses: Vec<LocationId>) -> Self {
        Self { warehouses }
    }

    fn filter(&self) -> ShipmentFilter {
        ShipmentFilter::waiting().with_warehouses(self.warehouses.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub blocks: u32,
    pub visited: usize,
    pub assigned: Vec<ShipmentId>,
    pub rejected: Vec<ShipmentId>,
    pub skipped: Vec<ShipmentId>,
    pub failed: Vec<(ShipmentId, String)>,
    /// Polls that found the moves table locked before the sweep started.
    pub lock_waits: u32,
    /// Whether the cursor reached the end of the backlog and restarted.
    pub wrapped: bool,
    /// Another sweep moved the cursor first; this one stopped without
    /// committing its last block.
    pub superseded: bool,
    /// Last cursor this sweep committed.
    pub cursor: AssignCursor,
}

/// Where the cursor goes once a block has been fetched.
///
/// A block that ends below `last_id` moves `next_id` to its top id. An empty
/// block, or one that reaches `last_id`, ends the pass: `next_id` resets to
/// zero and the caller recomputes `last_id`. Returns `true` on wrap.
pub fn advance(cursor: &mut AssignCursor, block_top: Option<ShipmentId>) -> bool {
    match block_top {
        Some(top) if top < cursor.last_id => {
            cursor.next_id = top;
            false
        }
        _ => {
            cursor.next_id = 0;
            true
        }
    }
}

pub struct BatchCursorScheduler {
    store: Arc<dyn StockStore>,
    gate: LockBackoffGate,
    options: AssignOptions,
    events: Option<EventSender>,
}

impl BatchCursorScheduler {
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

    /// Applies a cursor step outside a block commit. `Ok(false)` when
    /// another sweep got there first.
    async fn step(&self, from: AssignCursor, to: AssignCursor) -> Result<bool, ServiceError> {
        match self.store.advance_cursor(&CursorStep { from, to }).await {
            Ok(()) => Ok(true),
            Err(ServiceError::CursorMoved(_)) => {
                warn!(?from, "cursor moved by a concurrent sweep");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs up to `repeat_blocks` blocks of `block_size` waiting shipments
    /// each, advancing and persisting the cursor block by block.
    #[instrument(skip(self))]
    pub async fn run(&self, scope: &SweepScope) -> Result<SweepReport, ServiceError> {
        let started = std::time::Instant::now();
        let mut report = SweepReport {
            lock_waits: self.gate.wait_until_clear().await?,
            ..SweepReport::default()
        };

        let settings = self.store.load_settings().await?;
        let backlog = scope.filter();
        // what the store holds as far as this sweep knows
        let mut stored = settings.cursor;
        let mut cursor = stored;
        if cursor.is_stale() {
            cursor.last_id = self.store.max_shipment_id(&backlog).await?.unwrap_or(0);
            debug!(?cursor, "cursor re-derived from backlog");
        }
        if cursor.last_id <= 0 {
            info!("no waiting shipments to sweep");
            cursor.next_id = 0;
            if self.step(stored, cursor).await? {
                stored = cursor;
            } else {
                report.superseded = true;
            }
            report.cursor = stored;
            return Ok(report);
        }

        let tree = LocationTree::new(self.store.locations().await?);
        let pass = AllocationPass::new(
            self.store.as_ref(),
            &tree,
            self.options,
            self.options.window(None),
        );
        let repeats = settings.repeat_limit();
        let block_limit = settings.block_limit();

        loop {
            if repeats.map_or(false, |max| report.blocks >= max) {
                break;
            }
            report.blocks += 1;
            match repeats {
                Some(max) => info!("Start block {} of {}", report.blocks, max),
                None => info!("Start block {}", report.blocks),
            }

            let filter = backlog
                .clone()
                .id_range(cursor.next_id, cursor.last_id, block_limit);
            let shipments = self.store.shipments(&filter).await?;
            let wrapped = advance(&mut cursor, shipments.iter().map(|s| s.id).max());
            if wrapped {
                cursor.last_id = self.store.max_shipment_id(&backlog).await?.unwrap_or(0);
            }
            counter!("autoassign.sweep.blocks", 1);

            if shipments.is_empty() {
                if !self.step(stored, cursor).await? {
                    report.superseded = true;
                    break;
                }
            } else {
                let visited = shipments.len();
                let queue = pass.queue(shipments);
                let warehouses: HashMap<ShipmentId, LocationId> = queue
                    .iter()
                    .map(|d| (d.shipment_id, d.warehouse_id))
                    .collect();
                let (outcome, _) = pass.evaluate(&queue).await?;
                let step = CursorStep {
                    from: stored,
                    to: cursor,
                };
                let committed = match self
                    .store
                    .commit_assignments(Some(&step), &outcome.accepted)
                    .await
                {
                    Ok(committed) => committed,
                    Err(ServiceError::CursorMoved(from)) => {
                        warn!(?from, "cursor moved by a concurrent sweep, block dropped");
                        report.superseded = true;
                        break;
                    }
                    Err(err) => return Err(err),
                };

                counter!("autoassign.shipments.rejected", outcome.rejected.len() as u64);
                for id in &committed.assigned {
                    let warehouse = warehouses.get(id).copied().unwrap_or_default();
                    events::record_assignment(
                        self.events.as_ref(),
                        *id,
                        warehouse,
                        AssignTrigger::Sweep,
                    )
                    .await;
                }
                for (id, reason) in &committed.failed {
                    events::emit(
                        self.events.as_ref(),
                        Event::AssignmentFailed {
                            shipment_id: *id,
                            reason: reason.clone(),
                        },
                    )
                    .await;
                }
                report.visited += visited;
                report.rejected.extend(outcome.rejected);
                report.assigned.extend(committed.assigned);
                report.skipped.extend(committed.skipped);
                report.failed.extend(committed.failed);
            }
            stored = cursor;
            report.wrapped |= wrapped;

            // without a repeat limit one pass over the backlog is the whole run
            if wrapped && repeats.is_none() {
                break;
            }
            if cursor.last_id <= 0 {
                break;
            }
        }

        histogram!("autoassign.sweep.duration", started.elapsed());
        info!(
            blocks = report.blocks,
            visited = report.visited,
            assigned = report.assigned.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            superseded = report.superseded,
            next_id = stored.next_id,
            last_id = stored.last_id,
            "sweep finished"
        );
        report.cursor = stored;
        Ok(report)
    }
}
