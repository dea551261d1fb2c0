//! Net available quantity per (storage root, product).
//!
//! Available = on-hand in the root's subtree minus what assigned outbound
//! shipments already hold in the same subtree. The result is a transient
//! [`SupplyPool`] that one allocation pass consumes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::errors::ServiceError;
use crate::models::{LocationId, ProductId, StockLevel, SupplyKey};
use crate::services::location_tree::LocationTree;
use crate::store::{StockStore, StockWindow};

/// Pass-local supply. A key that was never set reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SupplyPool {
    quantities: BTreeMap<SupplyKey, Decimal>,
}

impl SupplyPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available(&self, key: &SupplyKey) -> Decimal {
        self.quantities.get(key).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn contains(&self, key: &SupplyKey) -> bool {
        self.quantities.contains_key(key)
    }

    pub fn set(&mut self, key: SupplyKey, quantity: Decimal) {
        self.quantities.insert(key, quantity);
    }

    pub fn add(&mut self, key: SupplyKey, quantity: Decimal) {
        *self.quantities.entry(key).or_insert(Decimal::ZERO) += quantity;
    }

    /// Removes `quantity` from `key`. Callers check availability first.
    pub(crate) fn consume(&mut self, key: &SupplyKey, quantity: Decimal) {
        if let Some(available) = self.quantities.get_mut(key) {
            *available -= quantity;
        }
    }

    pub fn len(&self) -> usize {
        self.quantities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SupplyKey, &Decimal)> {
        self.quantities.iter()
    }
}

impl FromIterator<(SupplyKey, Decimal)> for SupplyPool {
    fn from_iter<T: IntoIterator<Item = (SupplyKey, Decimal)>>(iter: T) -> Self {
        Self {
            quantities: iter.into_iter().collect(),
        }
    }
}

/// Rolls per-location levels up into the requested roots.
///
/// Every requested key whose root has bounds is present in the result (zero
/// when nothing is stocked); keys under an unbounded root are left out.
pub fn aggregate(
    tree: &LocationTree,
    keys: &BTreeSet<SupplyKey>,
    on_hand: &[StockLevel],
    reserved: &[StockLevel],
) -> SupplyPool {
    // (location, product) -> roots whose subtree holds that location
    let mut roots_of: HashMap<(LocationId, ProductId), Vec<LocationId>> = HashMap::new();
    let mut pool = SupplyPool::new();
    for &(root, product) in keys {
        let subtree = tree.subtree(root);
        if subtree.is_empty() {
            debug!(root, product, "root has no bounds; contributing nothing");
            continue;
        }
        pool.set((root, product), Decimal::ZERO);
        for location in subtree {
            roots_of.entry((location, product)).or_default().push(root);
        }
    }

    let mut apply = |levels: &[StockLevel], sign: Decimal| {
        for level in levels {
            if let Some(roots) = roots_of.get(&(level.location_id, level.product_id)) {
                for root in roots {
                    pool.add((*root, level.product_id), level.quantity * sign);
                }
            }
        }
    };
    apply(on_hand, Decimal::ONE);
    apply(reserved, Decimal::NEGATIVE_ONE);
    pool
}

/// Reads stock from the store and builds pools for a key set.
pub struct SupplyAggregator<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: StockStore + ?Sized> SupplyAggregator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    #[instrument(skip(self, tree, keys), fields(keys = keys.len()))]
    pub async fn pool(
        &self,
        tree: &LocationTree,
        keys: &BTreeSet<SupplyKey>,
        window: &StockWindow,
    ) -> Result<SupplyPool, ServiceError> {
        if keys.is_empty() {
            return Ok(SupplyPool::new());
        }
        let products: Vec<ProductId> = keys
            .iter()
            .map(|(_, product)| *product)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let on_hand = self.store.stock_levels(&products, window).await?;
        let reserved = self.store.reserved_levels(&products).await?;
        let pool = aggregate(tree, keys, &on_hand, &reserved);
        debug!(
            products = products.len(),
            on_hand_rows = on_hand.len(),
            reserved_rows = reserved.len(),
            "supply pool built"
        );
        Ok(pool)
    }
}
