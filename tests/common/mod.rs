//! Shared fixtures: a small warehouse hierarchy on a `MemoryStore`.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use stock_autoassign::models::{
    AssignSettings, LocationId, LocationKind, LocationNode, MoveId, MoveState, ProductId,
    Shipment, ShipmentDirection, ShipmentId, ShipmentState, StockMove,
};
use stock_autoassign::services::{AssignOptions, AutoAssignService, LockBackoffGate};
use stock_autoassign::store::{MemoryStore, NoLockProbe, StockStore};

pub const WH: LocationId = 1;
pub const STORAGE: LocationId = 2;
pub const OUTPUT: LocationId = 3;
pub const SHELF_A: LocationId = 4;
pub const SHELF_B: LocationId = 5;
pub const CUSTOMER: LocationId = 6;
pub const BIN_B1: LocationId = 7;
pub const INPUT: LocationId = 8;

pub const WH2: LocationId = 20;
pub const STORAGE2: LocationId = 21;

pub const P1: ProductId = 100;
pub const P2: ProductId = 200;

/// WH{STORAGE{SHELF_A, SHELF_B{BIN_B1}}, OUTPUT, INPUT}, WH2{STORAGE2}, CUSTOMER
pub fn locations() -> Vec<LocationNode> {
    vec![
        LocationNode::new(WH, "WH", LocationKind::Warehouse).with_storage(STORAGE),
        LocationNode::new(STORAGE, "Storage", LocationKind::Storage).with_parent(WH),
        LocationNode::new(OUTPUT, "Output", LocationKind::Storage).with_parent(WH),
        LocationNode::new(SHELF_A, "Shelf A", LocationKind::Storage).with_parent(STORAGE),
        LocationNode::new(SHELF_B, "Shelf B", LocationKind::Storage).with_parent(STORAGE),
        LocationNode::new(CUSTOMER, "Customer", LocationKind::Customer),
        LocationNode::new(BIN_B1, "Bin B1", LocationKind::Storage).with_parent(SHELF_B),
        LocationNode::new(INPUT, "Input", LocationKind::Storage).with_parent(WH),
        LocationNode::new(WH2, "WH2", LocationKind::Warehouse).with_storage(STORAGE2),
        LocationNode::new(STORAGE2, "Storage 2", LocationKind::Storage).with_parent(WH2),
    ]
}

pub fn store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.set_locations(locations());
    Arc::new(store)
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

/// Waiting outbound shipment of `WH` with one draft move per line
/// `(source, product, quantity)`.
pub fn outbound(
    id: ShipmentId,
    planned: Option<u32>,
    lines: &[(LocationId, ProductId, Decimal)],
) -> Shipment {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + chrono::Duration::minutes(id);
    Shipment {
        id,
        direction: ShipmentDirection::Outbound,
        state: ShipmentState::Waiting,
        warehouse_id: WH,
        planned_date: planned.map(day),
        created_at: at,
        updated_at: at,
        moves: lines
            .iter()
            .enumerate()
            .map(|(i, (from, product, quantity))| StockMove {
                id: id * 100 + i as i64,
                product_id: *product,
                quantity: *quantity,
                from_location_id: *from,
                to_location_id: OUTPUT,
                state: MoveState::Draft,
                shipment_id: Some(id),
                planned_date: planned.map(day),
                effective_date: None,
            })
            .collect(),
    }
}

/// Inbound shipment still in transit into `to`.
pub fn inbound(
    id: ShipmentId,
    to: LocationId,
    product: ProductId,
    quantity: Decimal,
) -> Shipment {
    let mut shipment = outbound(id, None, &[(CUSTOMER, product, quantity)]);
    shipment.direction = ShipmentDirection::Inbound;
    shipment.moves[0].to_location_id = to;
    shipment
}

/// Inbound shipment `id` received in full into `to`; returns its done move.
pub fn receive_inbound(
    store: &MemoryStore,
    id: ShipmentId,
    to: LocationId,
    product: ProductId,
    quantity: Decimal,
) -> MoveId {
    let shipment = inbound(id, to, product, quantity);
    let move_id = shipment.moves[0].id;
    store.insert_shipment(shipment);
    store.complete_move(move_id);
    store.set_shipment_state(id, ShipmentState::Done);
    move_id
}

pub fn settings(block_size: u32, repeat_blocks: u32) -> AssignSettings {
    AssignSettings {
        block_size: Some(block_size),
        repeat_blocks: Some(repeat_blocks),
        ..AssignSettings::default()
    }
}

pub fn service_with(store: Arc<MemoryStore>, options: AssignOptions) -> AutoAssignService {
    let store: Arc<dyn StockStore> = store;
    let gate = LockBackoffGate::new(Arc::new(NoLockProbe), Duration::from_millis(1));
    AutoAssignService::new(store, gate, options)
}

pub fn service(store: Arc<MemoryStore>) -> AutoAssignService {
    service_with(store, AssignOptions::default())
}
