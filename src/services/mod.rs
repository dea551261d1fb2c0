//! Allocation core: location index, demand queue, supply pool, greedy
//! allocator, and the triggers that drive them.

pub mod allocator;
pub mod autoassign;
pub mod demand;
pub mod location_tree;
pub mod lock_gate;
pub mod pass;
pub mod scheduler;
pub mod supply;

pub use autoassign::{AssignReport, AutoAssignService, ManualSelection};
pub use lock_gate::LockBackoffGate;
pub use pass::AssignOptions;
pub use scheduler::{BatchCursorScheduler, SweepReport, SweepScope};
