mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use rust_decimal_macros::dec;
use stock_autoassign::events::{AssignTrigger, Event, EventSender};
use stock_autoassign::models::{
    AssignCursor, AssignSettings, CursorStep, LocationNode, MoveId, ProductId, Shipment,
    ShipmentId, ShipmentState, StockLevel, StockMove,
};
use stock_autoassign::services::{
    AssignOptions, AutoAssignService, LockBackoffGate, SweepScope,
};
use stock_autoassign::store::{
    CommitReport, LockProbe, MemoryStore, NoLockProbe, ShipmentFilter, StockStore, StockWindow,
};
use stock_autoassign::ServiceError;

fn backlog(store: &MemoryStore, ids: impl IntoIterator<Item = ShipmentId>) {
    for id in ids {
        store.insert_shipment(outbound(id, None, &[(SHELF_A, P1, dec!(1))]));
    }
}

fn assigned_ids(store: &MemoryStore, ids: impl IntoIterator<Item = ShipmentId>) -> Vec<ShipmentId> {
    ids.into_iter()
        .filter(|id| store.shipment_state(*id) == Some(ShipmentState::Assigned))
        .collect()
}

#[tokio::test]
async fn blocks_resume_where_the_last_run_stopped() {
    let store = store();
    store.receive(SHELF_A, P1, dec!(1000));
    backlog(&store, 1..=25);
    store.set_settings(settings(10, 1));
    let service = service(store.clone());

    let run1 = service.run_sweep(&SweepScope::all()).await.unwrap();
    assert_eq!(run1.assigned, (1..=10).collect::<Vec<_>>());
    assert_eq!(store.cursor(), AssignCursor { next_id: 10, last_id: 25 });
    assert!(!run1.wrapped);

    let run2 = service.run_sweep(&SweepScope::all()).await.unwrap();
    assert_eq!(run2.assigned, (11..=20).collect::<Vec<_>>());
    assert_eq!(store.cursor(), AssignCursor { next_id: 20, last_id: 25 });

    let run3 = service.run_sweep(&SweepScope::all()).await.unwrap();
    assert_eq!(run3.assigned, (21..=25).collect::<Vec<_>>());
    assert!(run3.wrapped);
    assert_eq!(store.cursor().next_id, 0);
    assert_eq!(store.commit_count(), 3);
}

#[tokio::test]
async fn every_shipment_is_visited_once_per_pass_even_when_rejected() {
    let store = store();
    backlog(&store, 1..=25);
    store.set_settings(settings(10, 1));
    let service = service(store.clone());

    let mut visited = Vec::new();
    for _ in 0..3 {
        let report = service.run_sweep(&SweepScope::all()).await.unwrap();
        assert!(report.assigned.is_empty());
        visited.extend(report.rejected);
    }
    assert_eq!(visited, (1..=25).collect::<Vec<_>>());
    assert_eq!(store.cursor(), AssignCursor { next_id: 0, last_id: 25 });
}

#[tokio::test]
async fn stale_cursor_is_rederived_without_error() {
    let store = store();
    store.receive(SHELF_A, P1, dec!(100));
    backlog(&store, 1..=5);
    store.set_settings(AssignSettings {
        cursor: AssignCursor { next_id: 30, last_id: 25 },
        ..settings(10, 1)
    });
    let service = service(store.clone());

    let first = service.run_sweep(&SweepScope::all()).await.unwrap();
    assert_eq!(first.visited, 0);
    assert!(first.wrapped);
    assert_eq!(store.cursor(), AssignCursor { next_id: 0, last_id: 5 });

    let second = service.run_sweep(&SweepScope::all()).await.unwrap();
    assert_eq!(second.assigned, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn unbounded_settings_drain_the_backlog_in_one_block() {
    let store = store();
    store.receive(SHELF_A, P1, dec!(100));
    backlog(&store, 1..=25);
    store.set_settings(settings(0, 0));

    let report = service(store.clone())
        .run_sweep(&SweepScope::all())
        .await
        .unwrap();
    assert_eq!(report.blocks, 1);
    assert_eq!(report.assigned.len(), 25);
    assert!(report.wrapped);
}

#[tokio::test]
async fn unlimited_repeats_stop_at_the_wrap() {
    let store = store();
    store.receive(SHELF_A, P1, dec!(100));
    backlog(&store, 1..=25);
    store.set_settings(settings(10, 0));

    let report = service(store.clone())
        .run_sweep(&SweepScope::all())
        .await
        .unwrap();
    assert_eq!(report.blocks, 3);
    assert_eq!(report.visited, 25);
    assert_eq!(report.assigned.len(), 25);
}

#[tokio::test]
async fn empty_backlog_is_a_noop() {
    let store = store();
    let report = service(store.clone())
        .run_sweep(&SweepScope::all())
        .await
        .unwrap();
    assert_eq!(report.blocks, 0);
    assert_eq!(report.cursor, AssignCursor::default());
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn split_runs_assign_the_same_shipments_as_one_pass() {
    let quantities = [2, 3, 4, 1, 2, 5, 1, 1];
    let build = |block, repeat| {
        let store = store();
        store.receive(SHELF_A, P1, dec!(7));
        for (i, qty) in quantities.iter().enumerate() {
            let id = i as ShipmentId + 1;
            store.insert_shipment(outbound(
                id,
                None,
                &[(SHELF_A, P1, rust_decimal::Decimal::from(*qty))],
            ));
        }
        store.set_settings(settings(block, repeat));
        store
    };

    let split = build(3, 1);
    let service_split = service(split.clone());
    for _ in 0..3 {
        service_split.run_sweep(&SweepScope::all()).await.unwrap();
    }

    let whole = build(0, 0);
    service(whole.clone())
        .run_sweep(&SweepScope::all())
        .await
        .unwrap();

    assert_eq!(assigned_ids(&split, 1..=8), vec![1, 2, 4, 7]);
    assert_eq!(assigned_ids(&whole, 1..=8), assigned_ids(&split, 1..=8));
}

#[tokio::test]
async fn sweep_honours_warehouse_scope() {
    let store = store();
    store.receive(SHELF_A, P1, dec!(5));
    store.receive(STORAGE2, P1, dec!(5));
    let mut remote = outbound(1, None, &[(STORAGE2, P1, dec!(1))]);
    remote.warehouse_id = WH2;
    store.insert_shipment(remote);
    backlog(&store, [2]);

    let report = service(store.clone())
        .run_sweep(&SweepScope::warehouses(vec![WH2]))
        .await
        .unwrap();
    assert_eq!(report.assigned, vec![1]);
    assert_eq!(store.shipment_state(2), Some(ShipmentState::Waiting));
}

#[tokio::test]
async fn sweep_assignments_are_announced_as_sweep() {
    let store = store();
    store.receive(SHELF_A, P1, dec!(5));
    backlog(&store, 1..=2);
    let (sender, mut rx) = EventSender::channel(16);
    let service = service(store).with_events(sender);

    service.run_sweep(&SweepScope::all()).await.unwrap();

    let mut announced = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::ShipmentAssigned {
            shipment_id,
            warehouse_id,
            trigger,
            ..
        } = event
        {
            assert_eq!(trigger, AssignTrigger::Sweep);
            assert_eq!(warehouse_id, WH);
            announced.push(shipment_id);
        }
    }
    assert_eq!(announced, vec![1, 2]);
}

#[tokio::test]
async fn sweep_reports_completion() {
    let store = store();
    store.receive(SHELF_A, P1, dec!(5));
    backlog(&store, 1..=2);
    let (sender, mut rx) = EventSender::channel(16);
    let service = service(store).with_events(sender);

    service.run_sweep(&SweepScope::all()).await.unwrap();

    let mut completed = None;
    while let Ok(event) = rx.try_recv() {
        if let Event::SweepCompleted { assigned, .. } = event {
            completed = Some(assigned);
        }
    }
    assert_eq!(completed, Some(2));
}

struct BusyFor(AtomicU32);

#[async_trait]
impl LockProbe for BusyFor {
    async fn moves_locked(&self) -> Result<bool, ServiceError> {
        let left = self.0.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(false);
        }
        self.0.store(left - 1, Ordering::SeqCst);
        Ok(true)
    }
}

#[tokio::test]
async fn sweep_waits_for_the_moves_lock() {
    let store = store();
    store.receive(SHELF_A, P1, dec!(5));
    backlog(&store, [1]);
    let gate = LockBackoffGate::new(Arc::new(BusyFor(AtomicU32::new(2))), Duration::from_millis(1));
    let dyn_store: Arc<dyn StockStore> = store.clone();
    let service = AutoAssignService::new(dyn_store, gate, AssignOptions::default());

    let report = service.run_sweep(&SweepScope::all()).await.unwrap();
    assert_eq!(report.lock_waits, 2);
    assert_eq!(report.assigned, vec![1]);
}

#[tokio::test]
async fn lost_store_aborts_the_sweep() {
    let store = store();
    backlog(&store, [1]);
    store.set_offline(true);

    let err = service(store).run_sweep(&SweepScope::all()).await.unwrap_err();
    assert!(err.is_fatal());
}

/// Lets a rival sweep run to completion right before the first block commit.
struct Overtaken {
    inner: Arc<MemoryStore>,
    rival: Mutex<Option<AutoAssignService>>,
}

#[async_trait]
impl StockStore for Overtaken {
    async fn locations(&self) -> Result<Vec<LocationNode>, ServiceError> {
        self.inner.locations().await
    }

    async fn stock_levels(
        &self,
        products: &[ProductId],
        window: &StockWindow,
    ) -> Result<Vec<StockLevel>, ServiceError> {
        self.inner.stock_levels(products, window).await
    }

    async fn reserved_levels(
        &self,
        products: &[ProductId],
    ) -> Result<Vec<StockLevel>, ServiceError> {
        self.inner.reserved_levels(products).await
    }

    async fn shipments(&self, filter: &ShipmentFilter) -> Result<Vec<Shipment>, ServiceError> {
        self.inner.shipments(filter).await
    }

    async fn max_shipment_id(
        &self,
        filter: &ShipmentFilter,
    ) -> Result<Option<ShipmentId>, ServiceError> {
        self.inner.max_shipment_id(filter).await
    }

    async fn moves(&self, ids: &[MoveId]) -> Result<Vec<StockMove>, ServiceError> {
        self.inner.moves(ids).await
    }

    async fn load_settings(&self) -> Result<AssignSettings, ServiceError> {
        self.inner.load_settings().await
    }

    async fn save_cursor(&self, cursor: &AssignCursor) -> Result<(), ServiceError> {
        self.inner.save_cursor(cursor).await
    }

    async fn advance_cursor(&self, step: &CursorStep) -> Result<(), ServiceError> {
        self.inner.advance_cursor(step).await
    }

    async fn commit_assignments(
        &self,
        cursor: Option<&CursorStep>,
        shipments: &[ShipmentId],
    ) -> Result<CommitReport, ServiceError> {
        let rival = self.rival.lock().unwrap().take();
        if let Some(rival) = rival {
            rival.run_sweep(&SweepScope::all()).await.unwrap();
        }
        self.inner.commit_assignments(cursor, shipments).await
    }
}

#[tokio::test]
async fn overtaken_sweep_does_not_rewind_the_cursor() {
    let store = store();
    store.receive(SHELF_A, P1, dec!(1000));
    backlog(&store, 1..=25);
    store.set_settings(AssignSettings {
        cursor: AssignCursor { next_id: 10, last_id: 25 },
        ..settings(10, 2)
    });
    let overtaken = Arc::new(Overtaken {
        inner: store.clone(),
        rival: Mutex::new(Some(service(store.clone()))),
    });
    let gate = LockBackoffGate::new(Arc::new(NoLockProbe), Duration::from_millis(1));
    let slow = AutoAssignService::new(overtaken, gate, AssignOptions::default());

    let report = slow.run_sweep(&SweepScope::all()).await.unwrap();

    // the rival took 11..20 and 21..25 and wrapped first
    assert!(report.superseded);
    assert!(report.assigned.is_empty());
    assert_eq!(report.cursor, AssignCursor { next_id: 10, last_id: 25 });
    assert_eq!(store.cursor(), AssignCursor { next_id: 0, last_id: 25 });
    assert_eq!(assigned_ids(&store, 1..=25), (11..=25).collect::<Vec<_>>());

    // the next sweep starts the new pass at the bottom of the backlog
    let next = service(store.clone())
        .run_sweep(&SweepScope::all())
        .await
        .unwrap();
    assert_eq!(next.assigned, (1..=10).collect::<Vec<_>>());
}
