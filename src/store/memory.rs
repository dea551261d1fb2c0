//! In-process store used by tests and dry runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::errors::ServiceError;
use crate::models::{
    AssignCursor, AssignSettings, CursorStep, DemandOrder, LocationId, LocationNode, MoveId, MoveState, ProductId,
    Shipment, ShipmentDirection, ShipmentId, ShipmentState, StockLevel, StockMove,
};
use crate::services::location_tree::assign_bounds;
use crate::store::{CommitReport, ShipmentFilter, StockStore, StockWindow};

/// Location used as the counterpart of stock received through [`MemoryStore::receive`].
pub const SUPPLIER_LOCATION: LocationId = 0;

#[derive(Debug, Default)]
struct State {
    locations: Vec<LocationNode>,
    /// Shipment headers; moves live in `moves`.
    shipments: BTreeMap<ShipmentId, Shipment>,
    moves: BTreeMap<MoveId, StockMove>,
    settings: Option<AssignSettings>,
    fail_on: HashSet<ShipmentId>,
    offline: bool,
    commits: u32,
    next_move_id: MoveId,
}

impl State {
    fn check_online(&self) -> Result<(), ServiceError> {
        if self.offline {
            return Err(ServiceError::StoreUnavailable("memory store offline".into()));
        }
        Ok(())
    }

    fn assemble(&self, header: &Shipment) -> Shipment {
        let mut shipment = header.clone();
        shipment.moves = self
            .moves
            .values()
            .filter(|m| m.shipment_id == Some(header.id))
            .cloned()
            .collect();
        shipment
    }

    fn direction_of(&self, mv: &StockMove) -> Option<ShipmentDirection> {
        mv.shipment_id
            .and_then(|id| self.shipments.get(&id))
            .map(|s| s.direction)
    }

    fn state_of(&self, mv: &StockMove) -> Option<ShipmentState> {
        mv.shipment_id
            .and_then(|id| self.shipments.get(&id))
            .map(|s| s.state)
    }

    fn cursor_mut(&mut self) -> &mut AssignCursor {
        &mut self.settings.get_or_insert_with(AssignSettings::default).cursor
    }

    fn check_cursor(&mut self, step: &CursorStep) -> Result<(), ServiceError> {
        let current = *self.cursor_mut();
        if current != step.from {
            return Err(ServiceError::CursorMoved(step.from));
        }
        Ok(())
    }

    fn assign_one(&mut self, shipment_id: ShipmentId) -> Result<bool, ServiceError> {
        if self.fail_on.contains(&shipment_id) {
            return Err(ServiceError::InjectedFailure(shipment_id));
        }
        let Some(shipment) = self.shipments.get_mut(&shipment_id) else {
            return Ok(false);
        };
        if shipment.state != ShipmentState::Waiting {
            return Ok(false);
        }
        shipment.state = ShipmentState::Assigned;
        shipment.updated_at = Utc::now();
        for mv in self.moves.values_mut() {
            if mv.shipment_id == Some(shipment_id) && mv.state == MoveState::Draft {
                mv.state = MoveState::Assigned;
            }
        }
        Ok(true)
    }
}

/// Thread-safe [`StockStore`] over plain collections.
///
/// Commits apply per shipment; an injected failure leaves that shipment
/// untouched and lets the rest go through, mirroring savepoint isolation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_move_id: 1_000_000,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the location hierarchy, numbering its nested-set bounds.
    pub fn set_locations(&self, mut nodes: Vec<LocationNode>) {
        assign_bounds(&mut nodes);
        self.lock().locations = nodes;
    }

    pub fn set_settings(&self, settings: AssignSettings) {
        self.lock().settings = Some(settings);
    }

    pub fn insert_shipment(&self, mut shipment: Shipment) {
        let mut state = self.lock();
        for mut mv in shipment.moves.drain(..) {
            mv.shipment_id = Some(shipment.id);
            state.moves.insert(mv.id, mv);
        }
        state.shipments.insert(shipment.id, shipment);
    }

    /// Books a done receipt of `quantity` into `location`.
    pub fn receive(&self, location: LocationId, product: ProductId, quantity: Decimal) -> MoveId {
        let mut state = self.lock();
        state.next_move_id += 1;
        let id = state.next_move_id;
        state.moves.insert(
            id,
            StockMove {
                id,
                product_id: product,
                quantity,
                from_location_id: SUPPLIER_LOCATION,
                to_location_id: location,
                state: MoveState::Done,
                shipment_id: None,
                planned_date: None,
                effective_date: None,
            },
        );
        id
    }

    /// Marks a move done as of today.
    pub fn complete_move(&self, id: MoveId) {
        if let Some(mv) = self.lock().moves.get_mut(&id) {
            mv.state = MoveState::Done;
            mv.effective_date = Some(Utc::now().date_naive());
        }
    }

    pub fn set_shipment_state(&self, id: ShipmentId, to: ShipmentState) {
        if let Some(shipment) = self.lock().shipments.get_mut(&id) {
            shipment.state = to;
            shipment.updated_at = Utc::now();
        }
    }

    /// Makes every commit of `shipment` fail.
    pub fn fail_on(&self, shipment: ShipmentId) {
        self.lock().fail_on.insert(shipment);
    }

    /// Makes every call fail as if the connection was lost.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn shipment(&self, id: ShipmentId) -> Option<Shipment> {
        let state = self.lock();
        state.shipments.get(&id).map(|s| state.assemble(s))
    }

    pub fn shipment_state(&self, id: ShipmentId) -> Option<ShipmentState> {
        self.lock().shipments.get(&id).map(|s| s.state)
    }

    pub fn cursor(&self) -> AssignCursor {
        self.lock()
            .settings
            .as_ref()
            .map(|s| s.cursor)
            .unwrap_or_default()
    }

    /// Number of `commit_assignments` calls served.
    pub fn commit_count(&self) -> u32 {
        self.lock().commits
    }
}

#[async_trait]
impl StockStore for MemoryStore {
    async fn locations(&self) -> Result<Vec<LocationNode>, ServiceError> {
        let state = self.lock();
        state.check_online()?;
        Ok(state.locations.clone())
    }

    async fn stock_levels(
        &self,
        products: &[ProductId],
        window: &StockWindow,
    ) -> Result<Vec<StockLevel>, ServiceError> {
        let state = self.lock();
        state.check_online()?;
        let mut levels: BTreeMap<(LocationId, ProductId), Decimal> = BTreeMap::new();
        for mv in state.moves.values() {
            if !products.contains(&mv.product_id) {
                continue;
            }
            match mv.state {
                MoveState::Done if window.includes(mv.stock_date()) => {
                    *levels
                        .entry((mv.to_location_id, mv.product_id))
                        .or_default() += mv.quantity;
                    *levels
                        .entry((mv.from_location_id, mv.product_id))
                        .or_default() -= mv.quantity;
                }
                MoveState::Draft | MoveState::Assigned
                    if window.forecast
                        && state.direction_of(mv) == Some(ShipmentDirection::Inbound)
                        && window.includes(mv.planned_date) =>
                {
                    *levels
                        .entry((mv.to_location_id, mv.product_id))
                        .or_default() += mv.quantity;
                }
                _ => {}
            }
        }
        Ok(levels
            .into_iter()
            .map(|((location, product), quantity)| StockLevel::new(location, product, quantity))
            .collect())
    }

    async fn reserved_levels(
        &self,
        products: &[ProductId],
    ) -> Result<Vec<StockLevel>, ServiceError> {
        let state = self.lock();
        state.check_online()?;
        let mut levels: BTreeMap<(LocationId, ProductId), Decimal> = BTreeMap::new();
        for mv in state.moves.values() {
            let held = products.contains(&mv.product_id)
                && mv.state != MoveState::Cancel
                && state.direction_of(mv) == Some(ShipmentDirection::Outbound)
                && state.state_of(mv) == Some(ShipmentState::Assigned);
            if held {
                *levels
                    .entry((mv.from_location_id, mv.product_id))
                    .or_default() += mv.quantity;
            }
        }
        Ok(levels
            .into_iter()
            .map(|((location, product), quantity)| StockLevel::new(location, product, quantity))
            .collect())
    }

    async fn shipments(&self, filter: &ShipmentFilter) -> Result<Vec<Shipment>, ServiceError> {
        let state = self.lock();
        state.check_online()?;
        let mut found: Vec<Shipment> = state
            .shipments
            .values()
            .filter(|s| filter.matches(s))
            .map(|s| state.assemble(s))
            .filter(|s| {
                filter.products.as_ref().map_or(true, |products| {
                    s.open_moves().any(|m| products.contains(&m.product_id))
                })
            })
            .collect();
        match filter.order {
            DemandOrder::Id => found.sort_by_key(|s| s.id),
            DemandOrder::CreatedAt => found.sort_by_key(|s| (s.created_at, s.id)),
            DemandOrder::PlannedDate => {
                found.sort_by_key(|s| (s.planned_date.is_none(), s.planned_date, s.id))
            }
        }
        if let Some(limit) = filter.limit {
            found.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(found)
    }

    async fn max_shipment_id(
        &self,
        filter: &ShipmentFilter,
    ) -> Result<Option<ShipmentId>, ServiceError> {
        let state = self.lock();
        state.check_online()?;
        Ok(state
            .shipments
            .values()
            .filter(|s| filter.matches(s))
            .map(|s| s.id)
            .max())
    }

    async fn moves(&self, ids: &[MoveId]) -> Result<Vec<StockMove>, ServiceError> {
        let state = self.lock();
        state.check_online()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.moves.get(id).cloned())
            .collect())
    }

    async fn load_settings(&self) -> Result<AssignSettings, ServiceError> {
        let mut state = self.lock();
        state.check_online()?;
        Ok(state.settings.get_or_insert_with(AssignSettings::default).clone())
    }

    async fn save_cursor(&self, cursor: &AssignCursor) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.check_online()?;
        *state.cursor_mut() = *cursor;
        Ok(())
    }

    async fn advance_cursor(&self, step: &CursorStep) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.check_online()?;
        state.check_cursor(step)?;
        *state.cursor_mut() = step.to;
        Ok(())
    }

    async fn commit_assignments(
        &self,
        cursor: Option<&CursorStep>,
        shipments: &[ShipmentId],
    ) -> Result<CommitReport, ServiceError> {
        let mut state = self.lock();
        state.check_online()?;
        if let Some(step) = cursor {
            state.check_cursor(step)?;
        }
        state.commits += 1;
        let mut report = CommitReport::default();
        for &id in shipments {
            match state.assign_one(id) {
                Ok(true) => report.assigned.push(id),
                Ok(false) => report.skipped.push(id),
                Err(err) => report.failed.push((id, err.to_string())),
            }
        }
        if let Some(step) = cursor {
            *state.cursor_mut() = step.to;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationKind;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn waiting(id: ShipmentId, moves: Vec<StockMove>) -> Shipment {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        Shipment {
            id,
            direction: ShipmentDirection::Outbound,
            state: ShipmentState::Waiting,
            warehouse_id: 1,
            planned_date: None,
            created_at: at,
            updated_at: at,
            moves,
        }
    }

    fn out_move(id: MoveId, quantity: Decimal) -> StockMove {
        StockMove {
            id,
            product_id: 100,
            quantity,
            from_location_id: 2,
            to_location_id: 3,
            state: MoveState::Draft,
            shipment_id: None,
            planned_date: None,
            effective_date: None,
        }
    }

    #[tokio::test]
    async fn receipts_and_reservations_are_reported_per_location() {
        let store = MemoryStore::new();
        store.set_locations(vec![
            LocationNode::new(1, "WH", LocationKind::Warehouse).with_storage(2),
            LocationNode::new(2, "STO", LocationKind::Storage).with_parent(1),
        ]);
        store.receive(2, 100, dec!(10));
        store.insert_shipment(waiting(1, vec![out_move(11, dec!(4))]));
        store.set_shipment_state(1, ShipmentState::Assigned);

        let on_hand = store.stock_levels(&[100], &StockWindow::today()).await.unwrap();
        assert!(on_hand.contains(&StockLevel::new(2, 100, dec!(10))));
        let reserved = store.reserved_levels(&[100]).await.unwrap();
        assert_eq!(reserved, vec![StockLevel::new(2, 100, dec!(4))]);
    }

    #[tokio::test]
    async fn commit_isolates_injected_failure() {
        let store = MemoryStore::new();
        store.insert_shipment(waiting(1, vec![out_move(11, dec!(1))]));
        store.insert_shipment(waiting(2, vec![out_move(21, dec!(1))]));
        store.fail_on(1);
        let step = CursorStep {
            from: AssignCursor::default(),
            to: AssignCursor { next_id: 2, last_id: 9 },
        };

        let report = store.commit_assignments(Some(&step), &[1, 2, 3]).await.unwrap();
        assert_eq!(report.assigned, vec![2]);
        assert_eq!(report.skipped, vec![3]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(store.shipment_state(1), Some(ShipmentState::Waiting));
        assert_eq!(store.shipment(2).unwrap().moves[0].state, MoveState::Assigned);
        assert_eq!(store.cursor(), step.to);
    }

    #[tokio::test]
    async fn commit_with_a_moved_cursor_changes_nothing() {
        let store = MemoryStore::new();
        store.insert_shipment(waiting(1, vec![out_move(11, dec!(1))]));
        let ahead = AssignCursor { next_id: 20, last_id: 25 };
        store.save_cursor(&ahead).await.unwrap();
        let step = CursorStep {
            from: AssignCursor { next_id: 10, last_id: 25 },
            to: AssignCursor { next_id: 15, last_id: 25 },
        };

        let err = store.commit_assignments(Some(&step), &[1]).await.unwrap_err();
        assert!(matches!(err, ServiceError::CursorMoved(from) if from == step.from));
        assert_eq!(store.shipment_state(1), Some(ShipmentState::Waiting));
        assert_eq!(store.cursor(), ahead);
        assert_eq!(store.commit_count(), 0);

        assert!(store.advance_cursor(&step).await.is_err());
        store
            .advance_cursor(&CursorStep { from: ahead, to: AssignCursor::default() })
            .await
            .unwrap();
        assert_eq!(store.cursor(), AssignCursor::default());
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.load_settings().await.unwrap_err();
        assert!(err.is_fatal());
    }
}
