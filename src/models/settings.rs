use serde::{Deserialize, Serialize};

use super::ShipmentId;

pub const DEFAULT_BLOCK_SIZE: u32 = 500;
pub const DEFAULT_REPEAT_BLOCKS: u32 = 1;

/// Persisted position of the periodic sweep in the waiting backlog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignCursor {
    /// Last shipment id already handed to the allocator (exclusive lower bound).
    pub next_id: ShipmentId,
    /// Highest backlog id of the current pass (inclusive upper bound), 0 when unset.
    pub last_id: ShipmentId,
}

impl AssignCursor {
    /// Unset or exhausted cursors must be re-derived from a backlog scan.
    pub fn is_stale(&self) -> bool {
        self.last_id <= 0 || self.last_id <= self.next_id
    }
}

/// Cursor write that only lands while the stored cursor still equals `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorStep {
    pub from: AssignCursor,
    pub to: AssignCursor,
}

/// Tunables and cursor stored in the settings record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignSettings {
    pub try_wait_to_assign: bool,
    /// `None` or 0: one block covering the whole remaining range.
    pub block_size: Option<u32>,
    /// `None` or 0: keep taking blocks until the backlog wraps.
    pub repeat_blocks: Option<u32>,
    pub cursor: AssignCursor,
}

impl Default for AssignSettings {
    fn default() -> Self {
        Self {
            try_wait_to_assign: true,
            block_size: Some(DEFAULT_BLOCK_SIZE),
            repeat_blocks: Some(DEFAULT_REPEAT_BLOCKS),
            cursor: AssignCursor::default(),
        }
    }
}

impl AssignSettings {
    pub fn block_limit(&self) -> Option<u64> {
        self.block_size.filter(|n| *n > 0).map(u64::from)
    }

    pub fn repeat_limit(&self) -> Option<u32> {
        self.repeat_blocks.filter(|n| *n > 0)
    }
}

/// Which location a demand line draws from.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PoolScope {
    /// The whole storage subtree of the shipment's warehouse.
    #[default]
    WarehouseStorage,
    /// The move's own source location and its children.
    SourceLocation,
}

/// Priority key of the demand queue; ties always fall back to the id.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DemandOrder {
    #[default]
    PlannedDate,
    CreatedAt,
    Id,
}
