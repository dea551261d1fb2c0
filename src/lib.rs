//! Automatic reservation of stock for waiting outbound shipments.
//!
//! Waiting shipments are matched against the net free stock of their
//! warehouse storage, all-or-nothing per shipment, in planned-date order.
//! Assignment runs when shipments start waiting, when inbound stock lands,
//! on operator request, and as a periodic resumable sweep.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod models;
pub mod services;
pub mod store;

pub use errors::ServiceError;
pub use services::{AssignOptions, AutoAssignService, ManualSelection, SweepScope};
pub use store::{MemoryStore, SeaOrmStore, StockStore};
