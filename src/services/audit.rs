use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{audit_entry, stock_position};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::costing;

/// Payload for one append-only audit record
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub user_id: String,
    pub movement_id: Option<Uuid>,
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub previous_cost: Decimal,
    pub new_cost: Decimal,
    pub previous_quantity: Decimal,
    pub new_quantity: Decimal,
    pub reason: String,
}

/// Filters for the audit trail listing
#[derive(Debug, Clone, Default)]
pub struct AuditTrailFilter {
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
}

pub struct AuditService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl AuditService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Appends one audit record inside the caller's transaction
    pub async fn record<C: ConnectionTrait>(
        conn: &C,
        entry: NewAuditEntry,
    ) -> Result<audit_entry::Model, ServiceError> {
        let model = audit_entry::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(entry.user_id),
            movement_id: Set(entry.movement_id),
            item_id: Set(entry.item_id),
            warehouse_id: Set(entry.warehouse_id),
            previous_cost: Set(entry.previous_cost),
            new_cost: Set(entry.new_cost),
            previous_quantity: Set(entry.previous_quantity),
            new_quantity: Set(entry.new_quantity),
            cost_difference: Set(entry.new_cost - entry.previous_cost),
            reason: Set(entry.reason),
            created_at: Set(Utc::now()),
        };

        model.insert(conn).await.map_err(ServiceError::db_error)
    }

    /// Manual average cost override for a pinned-cost (or drifted) position.
    /// The quantity is untouched; the delta is recorded as one audit entry.
    #[instrument(skip(self), fields(item_id = %item_id, warehouse_id = %warehouse_id))]
    pub async fn override_average_cost(
        &self,
        user_id: &str,
        item_id: Uuid,
        warehouse_id: Uuid,
        new_cost: Decimal,
        reason: String,
    ) -> Result<stock_position::Model, ServiceError> {
        costing::validate_cost(new_cost)?;

        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let position = stock_position::Entity::find()
            .filter(stock_position::Column::ItemId.eq(item_id))
            .filter(stock_position::Column::WarehouseId.eq(warehouse_id))
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Stock position for item {} in warehouse {} not found",
                    item_id, warehouse_id
                ))
            })?;

        let previous_cost = position.average_unit_cost;

        let update = stock_position::Entity::update_many()
            .col_expr(
                stock_position::Column::AverageUnitCost,
                Expr::value(new_cost),
            )
            .col_expr(
                stock_position::Column::Version,
                Expr::value(position.version + 1),
            )
            .col_expr(stock_position::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(stock_position::Column::Id.eq(position.id))
            .filter(stock_position::Column::Version.eq(position.version))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        if update.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(position.id));
        }

        Self::record(
            &txn,
            NewAuditEntry {
                user_id: user_id.to_string(),
                movement_id: None,
                item_id,
                warehouse_id,
                previous_cost,
                new_cost,
                previous_quantity: position.quantity_on_hand,
                new_quantity: position.quantity_on_hand,
                reason,
            },
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(
            %item_id,
            %warehouse_id,
            %previous_cost,
            %new_cost,
            "average cost overridden"
        );

        self.event_sender
            .send(Event::AverageCostOverridden {
                item_id,
                warehouse_id,
                previous_cost,
                new_cost,
            })
            .await
            .map_err(ServiceError::EventError)?;

        stock_position::Entity::find_by_id(position.id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::InternalError("Stock position vanished".to_string()))
    }

    /// Audit trail listing, newest first
    pub async fn list(
        &self,
        filter: AuditTrailFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<audit_entry::Model>, u64), ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = audit_entry::Entity::find();
        if let Some(item_id) = filter.item_id {
            query = query.filter(audit_entry::Column::ItemId.eq(item_id));
        }
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(audit_entry::Column::WarehouseId.eq(warehouse_id));
        }

        let paginator = query
            .order_by_desc(audit_entry::Column::CreatedAt)
            .paginate(db, per_page.max(1));

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::db_error)?;
        let entries = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((entries, total))
    }
}
