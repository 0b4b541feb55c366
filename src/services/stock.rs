use std::sync::Arc;

use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::stock_position;
use crate::errors::ServiceError;

#[derive(Debug, Clone, Default)]
pub struct StockPositionFilter {
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
}

/// Read-only access to the stock position store for reporting callers.
/// Mutation stays with the costing engine and the recalculation service.
pub struct StockQueryService {
    db_pool: Arc<DbPool>,
}

impl StockQueryService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    pub async fn list_positions(
        &self,
        filter: StockPositionFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<stock_position::Model>, u64), ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = stock_position::Entity::find();
        if let Some(item_id) = filter.item_id {
            query = query.filter(stock_position::Column::ItemId.eq(item_id));
        }
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(stock_position::Column::WarehouseId.eq(warehouse_id));
        }

        let paginator = query
            .order_by_asc(stock_position::Column::WarehouseId)
            .order_by_asc(stock_position::Column::ItemId)
            .paginate(db, per_page.max(1));

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::db_error)?;
        let positions = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((positions, total))
    }
}
