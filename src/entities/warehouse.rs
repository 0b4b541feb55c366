use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stock-holding location. `auto_update_average_cost` selects the costing
/// mode for every entry movement into this warehouse: when false the average
/// stays pinned and only changes through an audited override.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "warehouses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    pub location: Option<String>,
    pub is_active: bool,
    pub auto_update_average_cost: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_position::Entity")]
    StockPosition,
}

impl Related<super::stock_position::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockPosition.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
