//! Domain types shared by the store adapters and the allocation services.
//!
//! These are materialized snapshots: the services never hold a live handle
//! into the store, they work on lists fetched up front.

mod location;
mod settings;
mod shipment;

pub use location::{LocationKind, LocationNode};
pub use settings::{
    AssignCursor, AssignSettings, CursorStep, DemandOrder, PoolScope, DEFAULT_BLOCK_SIZE, DEFAULT_REPEAT_BLOCKS,
};
pub use shipment::{
    MoveState, Shipment, ShipmentDirection, ShipmentState, StockLevel, StockMove,
};

pub type LocationId = i64;
pub type ProductId = i64;
pub type ShipmentId = i64;
pub type MoveId = i64;

/// Key of the supply pool: a storage root and a product.
pub type SupplyKey = (LocationId, ProductId);
