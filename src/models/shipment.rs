use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{LocationId, MoveId, ProductId, ShipmentId};

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
pub enum ShipmentState {
    Draft,
    Waiting,
    Assigned,
    Packed,
    Done,
    Cancel,
}

impl ShipmentState {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

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
pub enum MoveState {
    Draft,
    Assigned,
    Done,
    Cancel,
}

impl MoveState {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

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
pub enum ShipmentDirection {
    #[strum(serialize = "in")]
    #[serde(rename = "in")]
    Inbound,
    #[strum(serialize = "out")]
    #[serde(rename = "out")]
    Outbound,
}

impl ShipmentDirection {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMove {
    pub id: MoveId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub state: MoveState,
    pub shipment_id: Option<ShipmentId>,
    pub planned_date: Option<NaiveDate>,
    pub effective_date: Option<NaiveDate>,
}

impl StockMove {
    /// Date the move counts against: effective once done, planned before.
    pub fn stock_date(&self) -> Option<NaiveDate> {
        self.effective_date.or(self.planned_date)
    }
}

/// A shipment together with its inventory moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub direction: ShipmentDirection,
    pub state: ShipmentState,
    pub warehouse_id: LocationId,
    pub planned_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub moves: Vec<StockMove>,
}

impl Shipment {
    pub fn is_waiting(&self) -> bool {
        self.state == ShipmentState::Waiting
    }

    /// Moves still to be sourced; cancelled lines never count as demand.
    pub fn open_moves(&self) -> impl Iterator<Item = &StockMove> {
        self.moves
            .iter()
            .filter(|m| !matches!(m.state, MoveState::Cancel | MoveState::Done))
    }
}

/// Quantity of one product recorded at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLevel {
    pub location_id: LocationId,
    pub product_id: ProductId,
    pub quantity: Decimal,
}

impl StockLevel {
    pub fn new(location_id: LocationId, product_id: ProductId, quantity: Decimal) -> Self {
        Self {
            location_id,
            product_id,
            quantity,
        }
    }
}
