use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::models::{Shipment, ShipmentDirection, ShipmentState, StockMove};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shipments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub direction: String,
    pub state: String,
    pub warehouse_id: i64,
    pub planned_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_move::Entity")]
    Moves,
}

impl Related<super::stock_move::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Moves.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();
        if insert && active_model.created_at.is_not_set() {
            active_model.created_at = Set(now);
        }
        active_model.updated_at = Set(now);
        Ok(active_model)
    }
}

impl Model {
    /// Builds the domain shipment from the row and its already-loaded moves.
    pub fn into_shipment(self, moves: Vec<StockMove>) -> Result<Shipment, DbErr> {
        let state = self
            .state
            .parse::<ShipmentState>()
            .map_err(|_| DbErr::Type(format!("unknown shipment state '{}'", self.state)))?;
        let direction = self
            .direction
            .parse::<ShipmentDirection>()
            .map_err(|_| DbErr::Type(format!("unknown direction '{}'", self.direction)))?;
        Ok(Shipment {
            id: self.id,
            direction,
            state,
            warehouse_id: self.warehouse_id,
            planned_date: self.planned_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
            moves,
        })
    }
}
