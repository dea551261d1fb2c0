use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::{MoveState, StockMove};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_moves")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub product_id: i64,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub quantity: Decimal,
    pub from_location_id: i64,
    pub to_location_id: i64,
    pub state: String,
    pub shipment_id: Option<i64>,
    pub planned_date: Option<NaiveDate>,
    pub effective_date: Option<NaiveDate>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::shipment::Entity",
        from = "Column::ShipmentId",
        to = "super::shipment::Column::Id"
    )]
    Shipment,
}

impl Related<super::shipment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Shipment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for StockMove {
    type Error = DbErr;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let state = model
            .state
            .parse::<MoveState>()
            .map_err(|_| DbErr::Type(format!("unknown move state '{}'", model.state)))?;
        Ok(StockMove {
            id: model.id,
            product_id: model.product_id,
            quantity: model.quantity,
            from_location_id: model.from_location_id,
            to_location_id: model.to_location_id,
            state,
            shipment_id: model.shipment_id,
            planned_date: model.planned_date,
            effective_date: model.effective_date,
        })
    }
}
