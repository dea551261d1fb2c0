mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use chrono::{Duration as Days, Utc};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use stock_autoassign::config::AppConfig;
use stock_autoassign::db;
use stock_autoassign::entities::{shipment, stock_location, stock_move};
use stock_autoassign::models::{
    AssignCursor, CursorStep, MoveState, Shipment, ShipmentState, StockLevel, StockMove,
};
use stock_autoassign::services::location_tree::assign_bounds;
use stock_autoassign::services::{AssignOptions, AutoAssignService, LockBackoffGate, SweepScope};
use stock_autoassign::store::{NoLockProbe, SeaOrmStore, StockStore, StockWindow};
use stock_autoassign::ServiceError;

async fn sqlite() -> DatabaseConnection {
    // a single connection keeps the in-memory database alive across queries
    let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("db connect");
    db::run_migrations(&pool).await.expect("migrations");

    let mut nodes = locations();
    assign_bounds(&mut nodes);
    for node in nodes {
        stock_location::ActiveModel {
            id: Set(node.id),
            name: Set(node.name.clone()),
            kind: Set(node.kind.to_string()),
            parent_id: Set(node.parent_id),
            left: Set(node.left),
            right: Set(node.right),
            storage_location_id: Set(node.storage_location_id),
        }
        .insert(&pool)
        .await
        .expect("insert location");
    }
    pool
}

async fn persist(db: &DatabaseConnection, shipment: &Shipment) {
    shipment::ActiveModel {
        id: Set(shipment.id),
        direction: Set(shipment.direction.as_str().to_string()),
        state: Set(shipment.state.as_str().to_string()),
        warehouse_id: Set(shipment.warehouse_id),
        planned_date: Set(shipment.planned_date),
        created_at: Set(shipment.created_at),
        updated_at: Set(shipment.updated_at),
    }
    .insert(db)
    .await
    .expect("insert shipment");
    for mv in &shipment.moves {
        persist_move(db, mv).await;
    }
}

async fn persist_move(db: &DatabaseConnection, mv: &StockMove) {
    stock_move::ActiveModel {
        id: Set(mv.id),
        product_id: Set(mv.product_id),
        quantity: Set(mv.quantity),
        from_location_id: Set(mv.from_location_id),
        to_location_id: Set(mv.to_location_id),
        state: Set(mv.state.as_str().to_string()),
        shipment_id: Set(mv.shipment_id),
        planned_date: Set(mv.planned_date),
        effective_date: Set(mv.effective_date),
    }
    .insert(db)
    .await
    .expect("insert move");
}

async fn receive(db: &DatabaseConnection, id: i64, location: i64, quantity: rust_decimal::Decimal) {
    persist_move(
        db,
        &StockMove {
            id,
            product_id: P1,
            quantity,
            from_location_id: CUSTOMER,
            to_location_id: location,
            state: MoveState::Done,
            shipment_id: None,
            planned_date: None,
            effective_date: Some(day(1)),
        },
    )
    .await;
}

fn service(db: DatabaseConnection) -> (Arc<SeaOrmStore>, AutoAssignService) {
    let store = Arc::new(SeaOrmStore::new(Arc::new(db)));
    let dyn_store: Arc<dyn StockStore> = store.clone();
    let gate = LockBackoffGate::new(Arc::new(NoLockProbe), Duration::from_millis(1));
    (store, AutoAssignService::new(dyn_store, gate, AssignOptions::default()))
}

#[tokio::test]
async fn sqlite_store_assigns_and_persists_state() {
    let db = sqlite().await;
    receive(&db, 9_001, SHELF_A, dec!(10)).await;
    persist(&db, &outbound(1, Some(1), &[(SHELF_A, P1, dec!(6))])).await;
    persist(&db, &outbound(2, Some(2), &[(SHELF_A, P1, dec!(5))])).await;
    let (store, service) = service(db);

    let report = service.try_assign(&[1, 2]).await.expect("assign");
    assert_eq!(report.assigned, vec![1]);
    assert_eq!(report.rejected, vec![2]);

    let row = shipment::Entity::find_by_id(1)
        .one(store.connection())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.state, ShipmentState::Assigned.as_str());
    let moves = stock_move::Entity::find().all(store.connection()).await.unwrap();
    assert!(moves
        .iter()
        .filter(|m| m.shipment_id == Some(1))
        .all(|m| m.state == MoveState::Assigned.as_str()));

    let reserved = store.reserved_levels(&[P1]).await.expect("reserved");
    assert_eq!(reserved, vec![StockLevel::new(SHELF_A, P1, dec!(6))]);
}

#[tokio::test]
async fn sqlite_store_keeps_the_cursor_with_the_block() {
    let db = sqlite().await;
    receive(&db, 9_001, SHELF_A, dec!(100)).await;
    for id in 1..=5 {
        persist(&db, &outbound(id, None, &[(SHELF_A, P1, dec!(1))])).await;
    }
    let (store, service) = service(db);

    let report = service.run_sweep(&SweepScope::all()).await.expect("sweep");
    assert_eq!(report.visited, 5);
    assert_eq!(report.assigned.len(), 5);
    assert!(report.wrapped);

    let persisted = store.load_settings().await.expect("settings");
    assert_eq!(persisted.cursor.next_id, 0);
    assert_eq!(persisted.cursor.last_id, 5);
    assert!(persisted.try_wait_to_assign);
}

#[tokio::test]
async fn sqlite_store_sums_stock_inside_the_window() {
    let db = sqlite().await;
    receive(&db, 9_001, SHELF_A, dec!(10)).await;
    persist_move(
        &db,
        &StockMove {
            id: 9_002,
            product_id: P1,
            quantity: dec!(7),
            from_location_id: CUSTOMER,
            to_location_id: SHELF_A,
            state: MoveState::Done,
            shipment_id: None,
            planned_date: None,
            effective_date: Some(Utc::now().date_naive() + Days::days(30)),
        },
    )
    .await;
    let (store, _) = service(db);

    let today = store
        .stock_levels(&[P1], &StockWindow::today())
        .await
        .expect("levels");
    assert!(today.contains(&StockLevel::new(SHELF_A, P1, dec!(10))));
    assert!(today.contains(&StockLevel::new(CUSTOMER, P1, dec!(-10))));

    let later = store
        .stock_levels(&[P1], &StockWindow::today().with_start(Some(day(2))))
        .await
        .expect("levels");
    assert!(later.is_empty());
}

#[tokio::test]
async fn sqlite_store_refuses_a_cursor_step_from_a_stale_position() {
    let db = sqlite().await;
    let (store, _) = service(db);
    let ahead = AssignCursor { next_id: 20, last_id: 25 };
    store.save_cursor(&ahead).await.expect("save");

    let stale = CursorStep {
        from: AssignCursor { next_id: 10, last_id: 25 },
        to: AssignCursor { next_id: 15, last_id: 25 },
    };
    let err = store.advance_cursor(&stale).await.unwrap_err();
    assert!(matches!(err, ServiceError::CursorMoved(_)));
    let err = store.commit_assignments(Some(&stale), &[]).await.unwrap_err();
    assert!(matches!(err, ServiceError::CursorMoved(_)));
    assert_eq!(store.load_settings().await.expect("settings").cursor, ahead);

    store
        .advance_cursor(&CursorStep { from: ahead, to: AssignCursor::default() })
        .await
        .expect("step");
    assert_eq!(
        store.load_settings().await.expect("settings").cursor,
        AssignCursor::default()
    );
}
