use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{stock_position, warehouse};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{AuditService, NewAuditEntry};
use crate::services::costing::{self, PositionKey, PositionState};
use crate::services::history;
use crate::services::stock_locks::WarehouseLocks;

const RECALCULATION_REASON: &str = "cost recalculation";

#[derive(Debug, Clone)]
pub struct RecalculationOutcome {
    pub warehouse_id: Option<Uuid>,
    pub corrected_positions: u64,
    pub positions: Vec<stock_position::Model>,
}

/// Rebuilds stock positions from a clean baseline by replaying every
/// publicado movement in chronological order. This is the authoritative
/// reconciliation path: void does not restore prior averages and pinned
/// warehouses drift by design, so only a full replay is guaranteed to match
/// "apply all of history from zero".
pub struct RecalculationService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    locks: Arc<WarehouseLocks>,
}

impl RecalculationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, locks: Arc<WarehouseLocks>) -> Self {
        Self {
            db_pool,
            event_sender,
            locks,
        }
    }

    /// Recalculates one warehouse, or every warehouse when `warehouse_id` is
    /// absent. Holds the warehouse write lock(s) so no publish or void can
    /// interleave; the whole pass commits or rolls back as one transaction.
    ///
    /// The replay itself always spans all warehouses, since transfer-in
    /// valuation depends on the source warehouse's running average, but only
    /// rows in the requested scope are persisted and audited. Running it
    /// twice with no intervening ledger change writes nothing the second
    /// time.
    #[instrument(skip(self))]
    pub async fn recalculate(
        &self,
        user_id: &str,
        warehouse_id: Option<Uuid>,
    ) -> Result<RecalculationOutcome, ServiceError> {
        let db = self.db_pool.as_ref();

        let lock_scope = match warehouse_id {
            Some(id) => {
                warehouse::Entity::find_by_id(id)
                    .one(db)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Warehouse {} not found", id))
                    })?;
                vec![id]
            }
            None => warehouse::Entity::find()
                .all(db)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|w| w.id)
                .collect(),
        };

        let _guards = self.locks.write_many(&lock_scope).await;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let modes = history::load_costing_modes(&txn).await?;
        let lines = history::load_published_lines(&txn, None).await?;
        let replayed = costing::replay(lines.iter(), &modes)?;

        let mut current_query = stock_position::Entity::find();
        if let Some(id) = warehouse_id {
            current_query = current_query.filter(stock_position::Column::WarehouseId.eq(id));
        }
        let current_rows = current_query
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        let current: HashMap<PositionKey, stock_position::Model> = current_rows
            .into_iter()
            .map(|row| ((row.item_id, row.warehouse_id), row))
            .collect();

        let in_scope = |key: &PositionKey| match warehouse_id {
            Some(id) => key.1 == id,
            None => true,
        };

        let mut corrected: u64 = 0;
        let now = Utc::now();

        // Stable iteration order keeps audit output deterministic
        let mut replayed_keys: Vec<PositionKey> =
            replayed.keys().copied().filter(in_scope).collect();
        replayed_keys.sort();

        for key in &replayed_keys {
            let target = replayed[key];
            match current.get(key) {
                Some(row) => {
                    if row.quantity_on_hand == target.quantity
                        && row.average_unit_cost == target.average_cost
                    {
                        continue;
                    }
                    apply_correction(&txn, user_id, row, target, now).await?;
                    corrected += 1;
                }
                None => {
                    let (item_id, wh_id) = *key;
                    let row = stock_position::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        item_id: Set(item_id),
                        warehouse_id: Set(wh_id),
                        quantity_on_hand: Set(target.quantity),
                        average_unit_cost: Set(target.average_cost),
                        min_quantity: Set(None),
                        max_quantity: Set(None),
                        version: Set(1),
                        created_at: Set(now),
                        updated_at: Set(None),
                    };
                    row.insert(&txn).await.map_err(ServiceError::db_error)?;

                    AuditService::record(
                        &txn,
                        NewAuditEntry {
                            user_id: user_id.to_string(),
                            movement_id: None,
                            item_id,
                            warehouse_id: wh_id,
                            previous_cost: Decimal::ZERO,
                            new_cost: target.average_cost,
                            previous_quantity: Decimal::ZERO,
                            new_quantity: target.quantity,
                            reason: RECALCULATION_REASON.to_string(),
                        },
                    )
                    .await?;
                    corrected += 1;
                }
            }
        }

        // Rows with no surviving history reset to zero; thresholds stay
        let mut orphaned: Vec<&stock_position::Model> = current
            .iter()
            .filter(|(key, _)| !replayed.contains_key(*key))
            .map(|(_, row)| row)
            .collect();
        orphaned.sort_by_key(|row| (row.item_id, row.warehouse_id));

        for row in orphaned {
            if row.quantity_on_hand.is_zero() && row.average_unit_cost.is_zero() {
                continue;
            }
            apply_correction(&txn, user_id, row, PositionState::default(), now).await?;
            corrected += 1;
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        let mut result_query = stock_position::Entity::find();
        if let Some(id) = warehouse_id {
            result_query = result_query.filter(stock_position::Column::WarehouseId.eq(id));
        }
        let positions = result_query
            .order_by_asc(stock_position::Column::WarehouseId)
            .order_by_asc(stock_position::Column::ItemId)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        info!(?warehouse_id, corrected, "cost recalculation finished");

        self.event_sender
            .send(Event::CostsRecalculated {
                warehouse_id,
                corrected_positions: corrected,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(RecalculationOutcome {
            warehouse_id,
            corrected_positions: corrected,
            positions,
        })
    }
}

async fn apply_correction<C: ConnectionTrait>(
    conn: &C,
    user_id: &str,
    row: &stock_position::Model,
    target: PositionState,
    now: chrono::DateTime<Utc>,
) -> Result<(), ServiceError> {
    let update = stock_position::Entity::update_many()
        .col_expr(
            stock_position::Column::QuantityOnHand,
            Expr::value(target.quantity),
        )
        .col_expr(
            stock_position::Column::AverageUnitCost,
            Expr::value(target.average_cost),
        )
        .col_expr(stock_position::Column::Version, Expr::value(row.version + 1))
        .col_expr(stock_position::Column::UpdatedAt, Expr::value(now))
        .filter(stock_position::Column::Id.eq(row.id))
        .filter(stock_position::Column::Version.eq(row.version))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if update.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(row.id));
    }

    AuditService::record(
        conn,
        NewAuditEntry {
            user_id: user_id.to_string(),
            movement_id: None,
            item_id: row.item_id,
            warehouse_id: row.warehouse_id,
            previous_cost: row.average_unit_cost,
            new_cost: target.average_cost,
            previous_quantity: row.quantity_on_hand,
            new_quantity: target.quantity,
            reason: RECALCULATION_REASON.to_string(),
        },
    )
    .await?;

    Ok(())
}
