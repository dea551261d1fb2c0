use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::{LocationKind, LocationNode};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_locations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub name: String,
    pub kind: String, // stored as string, converted through LocationKind
    pub parent_id: Option<i64>,
    pub left: Option<i64>,
    pub right: Option<i64>,
    pub storage_location_id: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for LocationNode {
    type Error = DbErr;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let kind = model
            .kind
            .parse::<LocationKind>()
            .map_err(|_| DbErr::Type(format!("unknown location kind '{}'", model.kind)))?;
        Ok(LocationNode {
            id: model.id,
            name: model.name,
            kind,
            parent_id: model.parent_id,
            left: model.left,
            right: model.right,
            storage_location_id: model.storage_location_id,
        })
    }
}
