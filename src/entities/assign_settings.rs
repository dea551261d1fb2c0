use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::{AssignCursor, AssignSettings};

/// Singleton row (id = 1) holding the assignment tunables and sweep cursor.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assign_settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    pub try_wait_to_assign: bool,
    pub block_size: Option<i32>,
    pub repeat_blocks: Option<i32>,
    pub next_id: i64,
    pub last_id: i64,
}

pub const SETTINGS_ROW_ID: i32 = 1;

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for AssignSettings {
    fn from(model: Model) -> Self {
        AssignSettings {
            try_wait_to_assign: model.try_wait_to_assign,
            block_size: model.block_size.and_then(|n| u32::try_from(n).ok()),
            repeat_blocks: model.repeat_blocks.and_then(|n| u32::try_from(n).ok()),
            cursor: AssignCursor {
                next_id: model.next_id,
                last_id: model.last_id,
            },
        }
    }
}
