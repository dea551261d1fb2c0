use serde::{Deserialize, Serialize};

use super::LocationId;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LocationKind {
    Warehouse,
    Storage,
    Customer,
    Supplier,
    View,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// A node of the location hierarchy with its nested-set bounds.
///
/// `left`/`right` are maintained by the store. A node without bounds has no
/// subtree as far as aggregation is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationNode {
    pub id: LocationId,
    pub name: String,
    pub kind: LocationKind,
    pub parent_id: Option<LocationId>,
    pub left: Option<i64>,
    pub right: Option<i64>,
    /// Root storage location, only set on warehouses.
    pub storage_location_id: Option<LocationId>,
}

impl LocationNode {
    pub fn new(id: LocationId, name: impl Into<String>, kind: LocationKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            parent_id: None,
            left: None,
            right: None,
            storage_location_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: LocationId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_storage(mut self, storage_location_id: LocationId) -> Self {
        self.storage_location_id = Some(storage_location_id);
        self
    }

    /// Bounds usable for containment tests. Inverted bounds count as missing.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        match (self.left, self.right) {
            (Some(left), Some(right)) if left <= right => Some((left, right)),
            _ => None,
        }
    }
}
