use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::EntityTrait;
use tracing::instrument;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::movement::{MovementSubtype, MovementType};
use crate::entities::{item, warehouse};
use crate::errors::ServiceError;
use crate::services::costing::{self, round_cost};
use crate::services::history;

#[derive(Debug, Clone)]
pub struct KardexQuery {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub movement_type: Option<MovementType>,
    pub page: u64,
    pub per_page: u64,
}

/// One ledger row: the movement's effect on the pair and the running state
/// immediately after it. Derived on demand, never persisted.
#[derive(Debug, Clone)]
pub struct KardexRow {
    pub movement_id: Uuid,
    pub movement_date: DateTime<Utc>,
    pub movement_type: MovementType,
    pub subtype: Option<MovementSubtype>,
    pub reference_document: Option<String>,
    pub line_number: i32,
    pub entry_quantity: Decimal,
    pub entry_value: Decimal,
    pub exit_quantity: Decimal,
    pub exit_value: Decimal,
    pub balance_quantity: Decimal,
    pub average_cost: Decimal,
    pub balance_value: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct KardexSummary {
    pub total_entry_quantity: Decimal,
    pub total_entry_value: Decimal,
    pub total_exit_quantity: Decimal,
    pub total_exit_value: Decimal,
    pub final_balance: Decimal,
    pub final_valuation: Decimal,
    pub average_cost: Decimal,
}

#[derive(Debug, Clone)]
pub struct KardexReport {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub rows: Vec<KardexRow>,
    pub summary: KardexSummary,
    pub total_rows: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Pure, read-only reconstruction of the ledger view for one
/// (item, warehouse) pair. Replays the item's full publicado history across
/// all warehouses, so transfer-in rows carry the exact source valuation, and
/// never reads or writes the stock position store. A summary that disagrees
/// with the stored position is the drift signal that calls for a
/// recalculation, not an error.
pub struct KardexService {
    db_pool: Arc<DbPool>,
}

impl KardexService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self), fields(item_id = %query.item_id, warehouse_id = %query.warehouse_id))]
    pub async fn get_kardex(&self, query: KardexQuery) -> Result<KardexReport, ServiceError> {
        let db = self.db_pool.as_ref();

        item::Entity::find_by_id(query.item_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Item {} not found", query.item_id)))?;
        warehouse::Entity::find_by_id(query.warehouse_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Warehouse {} not found", query.warehouse_id))
            })?;

        let modes = history::load_costing_modes(db).await?;
        let lines = history::load_published_lines(db, Some(query.item_id)).await?;

        // Full-history replay first; running balances are absolute and a
        // date range or type filter only narrows which rows are emitted.
        let mut positions = HashMap::new();
        let mut rows = Vec::new();
        for line in &lines {
            let effects = costing::apply_line(&mut positions, &modes, line)?;
            for effect in effects {
                if effect.warehouse_id != query.warehouse_id {
                    continue;
                }
                rows.push(KardexRow {
                    movement_id: line.movement_id,
                    movement_date: line.movement_date,
                    movement_type: line.movement_type,
                    subtype: line.subtype,
                    reference_document: line.reference_document.clone(),
                    line_number: line.line_number,
                    entry_quantity: effect.entry_quantity,
                    entry_value: round_cost(effect.entry_quantity * effect.unit_cost),
                    exit_quantity: effect.exit_quantity,
                    exit_value: round_cost(effect.exit_quantity * effect.unit_cost),
                    balance_quantity: effect.position_after.quantity,
                    average_cost: effect.position_after.average_cost,
                    balance_value: round_cost(
                        effect.position_after.quantity * effect.position_after.average_cost,
                    ),
                });
            }
        }

        let filtered: Vec<KardexRow> = rows
            .into_iter()
            .filter(|row| {
                if let Some(from) = query.from {
                    if row.movement_date < from {
                        return false;
                    }
                }
                if let Some(to) = query.to {
                    if row.movement_date > to {
                        return false;
                    }
                }
                if let Some(movement_type) = query.movement_type {
                    if row.movement_type != movement_type {
                        return false;
                    }
                }
                true
            })
            .collect();

        // Totals cover the whole filtered sequence; pagination only slices
        // the already-computed rows afterwards.
        let mut summary = KardexSummary::default();
        for row in &filtered {
            summary.total_entry_quantity += row.entry_quantity;
            summary.total_entry_value += row.entry_value;
            summary.total_exit_quantity += row.exit_quantity;
            summary.total_exit_value += row.exit_value;
        }
        if let Some(last) = filtered.last() {
            summary.final_balance = last.balance_quantity;
            summary.average_cost = last.average_cost;
            summary.final_valuation = last.balance_value;
        }

        let total_rows = filtered.len() as u64;
        let per_page = query.per_page.max(1);
        let offset = (query.page.saturating_sub(1) * per_page) as usize;
        let page_rows: Vec<KardexRow> = filtered
            .into_iter()
            .skip(offset)
            .take(per_page as usize)
            .collect();

        Ok(KardexReport {
            item_id: query.item_id,
            warehouse_id: query.warehouse_id,
            rows: page_rows,
            summary,
            total_rows,
            page: query.page.max(1),
            per_page,
        })
    }
}
