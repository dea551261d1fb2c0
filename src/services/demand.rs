//! Ordered queue of waiting shipments expanded into supply-keyed lines.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

use crate::errors::ServiceError;
use crate::models::{
    DemandOrder, LocationId, MoveId, PoolScope, ProductId, Shipment, ShipmentId, StockMove,
    SupplyKey,
};
use crate::services::location_tree::LocationTree;
use crate::store::{ShipmentFilter, StockStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandLine {
    pub move_id: MoveId,
    pub root: LocationId,
    pub product_id: ProductId,
    pub quantity: Decimal,
}

impl DemandLine {
    pub fn key(&self) -> SupplyKey {
        (self.root, self.product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShipmentDemand {
    pub shipment_id: ShipmentId,
    pub warehouse_id: LocationId,
    pub lines: Vec<DemandLine>,
}

/// Shipments in service order. Built once per pass and never re-queried.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DemandQueue {
    items: Vec<ShipmentDemand>,
}

impl DemandQueue {
    pub fn from_demands(items: Vec<ShipmentDemand>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShipmentDemand> {
        self.items.iter()
    }

    pub fn shipment_ids(&self) -> Vec<ShipmentId> {
        self.items.iter().map(|d| d.shipment_id).collect()
    }

    /// Every supply key any line of the queue draws from.
    pub fn keys(&self) -> BTreeSet<SupplyKey> {
        self.items
            .iter()
            .flat_map(|d| d.lines.iter().map(DemandLine::key))
            .collect()
    }

    /// Keeps only shipments with at least one line on one of `keys`.
    pub fn retain_touching(&mut self, keys: &BTreeSet<SupplyKey>) {
        self.items
            .retain(|d| d.lines.iter().any(|line| keys.contains(&line.key())));
    }
}

impl IntoIterator for DemandQueue {
    type Item = ShipmentDemand;
    type IntoIter = std::vec::IntoIter<ShipmentDemand>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

pub struct DemandQueueBuilder<'a> {
    tree: &'a LocationTree,
    scope: PoolScope,
    order: DemandOrder,
}

impl<'a> DemandQueueBuilder<'a> {
    pub fn new(tree: &'a LocationTree, scope: PoolScope, order: DemandOrder) -> Self {
        Self { tree, scope, order }
    }

    /// Fetches the filtered shipments and builds the queue.
    #[instrument(skip(self, store))]
    pub async fn load<S: StockStore + ?Sized>(
        &self,
        store: &S,
        filter: &ShipmentFilter,
    ) -> Result<DemandQueue, ServiceError> {
        let shipments = store.shipments(filter).await?;
        Ok(self.build(shipments))
    }

    /// Orders waiting shipments by the priority key (ascending, id breaks
    /// ties) and flattens their open moves. Non-waiting shipments are dropped.
    pub fn build(&self, shipments: Vec<Shipment>) -> DemandQueue {
        let mut shipments: Vec<Shipment> =
            shipments.into_iter().filter(Shipment::is_waiting).collect();
        shipments.sort_by(|a, b| compare(self.order, a, b));

        let items = shipments
            .iter()
            .map(|shipment| ShipmentDemand {
                shipment_id: shipment.id,
                warehouse_id: shipment.warehouse_id,
                lines: shipment
                    .open_moves()
                    .map(|mv| DemandLine {
                        move_id: mv.id,
                        root: self.root_for(shipment, mv),
                        product_id: mv.product_id,
                        quantity: mv.quantity,
                    })
                    .collect(),
            })
            .collect();
        DemandQueue { items }
    }

    fn root_for(&self, shipment: &Shipment, mv: &StockMove) -> LocationId {
        match self.scope {
            PoolScope::SourceLocation => mv.from_location_id,
            PoolScope::WarehouseStorage => self
                .tree
                .warehouse_storage(shipment.warehouse_id)
                .or_else(|| self.tree.storage_root_of(mv.from_location_id))
                .unwrap_or(mv.from_location_id),
        }
    }
}

fn compare(order: DemandOrder, a: &Shipment, b: &Shipment) -> Ordering {
    let primary = match order {
        // undated shipments go after every dated one
        DemandOrder::PlannedDate => a
            .planned_date
            .is_none()
            .cmp(&b.planned_date.is_none())
            .then(a.planned_date.cmp(&b.planned_date)),
        DemandOrder::CreatedAt => a.created_at.cmp(&b.created_at),
        DemandOrder::Id => Ordering::Equal,
    };
    primary.then(a.id.cmp(&b.id))
}
