//! Interfaces to the stock store the allocation core runs against.
//!
//! The store owns shipments, moves, locations and the settings record; the
//! core only reads them and writes the `waiting -> assigned` transition plus
//! the sweep cursor.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::{
    AssignCursor, AssignSettings, CursorStep, DemandOrder, LocationId, LocationNode, MoveId, ProductId,
    Shipment, ShipmentDirection, ShipmentId, ShipmentState, StockLevel, StockMove,
};

pub mod database;
pub mod memory;

pub use database::{PgLockProbe, SeaOrmStore};
pub use memory::MemoryStore;

/// Date range stock is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockWindow {
    /// Snapshot date; moves dated after it are ignored.
    pub end: NaiveDate,
    /// Moves dated before it are ignored.
    pub start: Option<NaiveDate>,
    /// Count inbound quantity still in transit.
    pub forecast: bool,
}

impl StockWindow {
    pub fn on(end: NaiveDate) -> Self {
        Self {
            end,
            start: None,
            forecast: false,
        }
    }

    pub fn today() -> Self {
        Self::on(Utc::now().date_naive())
    }

    pub fn with_start(mut self, start: Option<NaiveDate>) -> Self {
        self.start = start;
        self
    }

    pub fn includes(&self, date: Option<NaiveDate>) -> bool {
        match date {
            Some(date) => date <= self.end && self.start.map_or(true, |start| date >= start),
            // undated moves are always current
            None => true,
        }
    }
}

/// Selection of shipments with their moves materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentFilter {
    pub direction: ShipmentDirection,
    pub states: Vec<ShipmentState>,
    pub ids: Option<Vec<ShipmentId>>,
    pub warehouses: Vec<LocationId>,
    pub updated_since: Option<DateTime<Utc>>,
    /// Exclusive lower id bound.
    pub id_after: Option<ShipmentId>,
    /// Inclusive upper id bound.
    pub id_up_to: Option<ShipmentId>,
    /// Only shipments with an open move for one of these products.
    pub products: Option<Vec<ProductId>>,
    pub order: DemandOrder,
    pub limit: Option<u64>,
}

impl Default for ShipmentFilter {
    fn default() -> Self {
        Self::waiting()
    }
}

impl ShipmentFilter {
    /// Outbound shipments in the `waiting` state, the allocation candidates.
    pub fn waiting() -> Self {
        Self {
            direction: ShipmentDirection::Outbound,
            states: vec![ShipmentState::Waiting],
            ids: None,
            warehouses: Vec::new(),
            updated_since: None,
            id_after: None,
            id_up_to: None,
            products: None,
            order: DemandOrder::default(),
            limit: None,
        }
    }

    /// Inbound shipments among `ids`, whatever their state.
    pub fn inbound(ids: Vec<ShipmentId>) -> Self {
        Self {
            direction: ShipmentDirection::Inbound,
            states: vec![
                ShipmentState::Draft,
                ShipmentState::Waiting,
                ShipmentState::Assigned,
                ShipmentState::Packed,
                ShipmentState::Done,
                ShipmentState::Cancel,
            ],
            ids: Some(ids),
            ..Self::waiting()
        }
    }

    pub fn with_ids(mut self, ids: Vec<ShipmentId>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_warehouses(mut self, warehouses: Vec<LocationId>) -> Self {
        self.warehouses = warehouses;
        self
    }

    pub fn updated_since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.updated_since = since;
        self
    }

    pub fn with_products(mut self, products: Vec<ProductId>) -> Self {
        self.products = Some(products);
        self
    }

    pub fn ordered_by(mut self, order: DemandOrder) -> Self {
        self.order = order;
        self
    }

    /// Id range `(after, up_to]` in ascending id order, at most `limit` rows.
    pub fn id_range(
        mut self,
        after: ShipmentId,
        up_to: ShipmentId,
        limit: Option<u64>,
    ) -> Self {
        self.id_after = Some(after);
        self.id_up_to = Some(up_to);
        self.order = DemandOrder::Id;
        self.limit = limit;
        self
    }

    /// In-memory evaluation of everything but products, order and limit.
    pub fn matches(&self, shipment: &Shipment) -> bool {
        shipment.direction == self.direction
            && self.states.contains(&shipment.state)
            && self.ids.as_ref().map_or(true, |ids| ids.contains(&shipment.id))
            && (self.warehouses.is_empty() || self.warehouses.contains(&shipment.warehouse_id))
            && self
                .updated_since
                .map_or(true, |since| shipment.updated_at >= since)
            && self.id_after.map_or(true, |after| shipment.id > after)
            && self.id_up_to.map_or(true, |up_to| shipment.id <= up_to)
    }
}

/// Outcome of committing a set of accepted shipments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitReport {
    pub assigned: Vec<ShipmentId>,
    /// No longer waiting when the commit ran; left untouched.
    pub skipped: Vec<ShipmentId>,
    pub failed: Vec<(ShipmentId, String)>,
}

impl CommitReport {
    pub fn merge(&mut self, other: CommitReport) {
        self.assigned.extend(other.assigned);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
    }
}

/// Query and commit interface of the stock store.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Snapshot of the location hierarchy with nested-set bounds.
    async fn locations(&self) -> Result<Vec<LocationNode>, ServiceError>;

    /// Net quantity per location of the given products inside `window`:
    /// done moves in minus done moves out, plus in-transit inbound quantity
    /// when `window.forecast` is set.
    async fn stock_levels(
        &self,
        products: &[ProductId],
        window: &StockWindow,
    ) -> Result<Vec<StockLevel>, ServiceError>;

    /// Quantity held by assigned outbound shipments, per source location.
    async fn reserved_levels(&self, products: &[ProductId])
        -> Result<Vec<StockLevel>, ServiceError>;

    async fn shipments(&self, filter: &ShipmentFilter) -> Result<Vec<Shipment>, ServiceError>;

    /// Highest shipment id matching the filter's predicate.
    async fn max_shipment_id(
        &self,
        filter: &ShipmentFilter,
    ) -> Result<Option<ShipmentId>, ServiceError>;

    async fn moves(&self, ids: &[MoveId]) -> Result<Vec<StockMove>, ServiceError>;

    /// Settings record, created from defaults on first read.
    async fn load_settings(&self) -> Result<AssignSettings, ServiceError>;

    /// Overwrites the cursor unconditionally.
    async fn save_cursor(&self, cursor: &AssignCursor) -> Result<(), ServiceError>;

    /// Writes `step.to` if the stored cursor still equals `step.from`,
    /// otherwise fails with [`ServiceError::CursorMoved`].
    async fn advance_cursor(&self, step: &CursorStep) -> Result<(), ServiceError>;

    /// Moves each shipment (and its open moves) from `waiting` to `assigned`.
    ///
    /// All shipments and the optional cursor step share one transaction; each
    /// shipment is isolated so one failure does not undo the others. A cursor
    /// step whose `from` no longer matches aborts the whole commit with
    /// [`ServiceError::CursorMoved`] before any shipment is touched.
    async fn commit_assignments(
        &self,
        cursor: Option<&CursorStep>,
        shipments: &[ShipmentId],
    ) -> Result<CommitReport, ServiceError>;
}

/// Reports whether a concurrent writer holds a conflicting lock on moves.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LockProbe: Send + Sync {
    async fn moves_locked(&self) -> Result<bool, ServiceError>;
}

/// Probe for stores without table locks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLockProbe;

#[async_trait]
impl LockProbe for NoLockProbe {
    async fn moves_locked(&self) -> Result<bool, ServiceError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn shipment(id: ShipmentId, warehouse: LocationId, state: ShipmentState) -> Shipment {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        Shipment {
            id,
            direction: ShipmentDirection::Outbound,
            state,
            warehouse_id: warehouse,
            planned_date: None,
            created_at: at,
            updated_at: at,
            moves: Vec::new(),
        }
    }

    #[test]
    fn waiting_filter_matches_only_waiting_outbound() {
        let filter = ShipmentFilter::waiting();
        assert!(filter.matches(&shipment(1, 10, ShipmentState::Waiting)));
        assert!(!filter.matches(&shipment(2, 10, ShipmentState::Assigned)));
        let mut inbound = shipment(3, 10, ShipmentState::Waiting);
        inbound.direction = ShipmentDirection::Inbound;
        assert!(!filter.matches(&inbound));
    }

    #[test]
    fn id_range_is_half_open() {
        let filter = ShipmentFilter::waiting().id_range(10, 20, Some(5));
        assert!(!filter.matches(&shipment(10, 1, ShipmentState::Waiting)));
        assert!(filter.matches(&shipment(11, 1, ShipmentState::Waiting)));
        assert!(filter.matches(&shipment(20, 1, ShipmentState::Waiting)));
        assert!(!filter.matches(&shipment(21, 1, ShipmentState::Waiting)));
        assert_eq!(filter.limit, Some(5));
    }

    #[test]
    fn inbound_filter_ignores_state_but_not_direction() {
        let filter = ShipmentFilter::inbound(vec![1, 2]);
        let mut done = shipment(1, 10, ShipmentState::Done);
        done.direction = ShipmentDirection::Inbound;
        assert!(filter.matches(&done));
        assert!(!filter.matches(&shipment(2, 10, ShipmentState::Done)));
    }

    #[test]
    fn warehouse_scope_applies_when_set() {
        let filter = ShipmentFilter::waiting().with_warehouses(vec![10]);
        assert!(filter.matches(&shipment(1, 10, ShipmentState::Waiting)));
        assert!(!filter.matches(&shipment(2, 11, ShipmentState::Waiting)));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let end = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let window = StockWindow::on(end).with_start(Some(start));
        assert!(window.includes(Some(end)));
        assert!(window.includes(Some(start)));
        assert!(window.includes(None));
        assert!(!window.includes(end.succ_opt()));
        assert!(!window.includes(start.pred_opt()));
    }
}
