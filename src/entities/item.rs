use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog item. The identity fields (code, unit of measure) never change;
/// `global_average_cost` is informational only, the authoritative cost lives
/// on the per-warehouse stock position.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub unit_of_measure: String,
    pub category: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub global_average_cost: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_position::Entity")]
    StockPosition,
    #[sea_orm(has_many = "super::movement_detail::Entity")]
    MovementDetail,
}

impl Related<super::stock_position::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockPosition.def()
    }
}

impl Related<super::movement_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MovementDetail.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
