//! Loading the ordered publicado line stream that the replay-based
//! components (recalculation, kardex) consume.

use std::collections::HashMap;

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::entities::movement::{self, MovementState, MovementSubtype};
use crate::entities::{movement_detail, warehouse};
use crate::errors::ServiceError;
use crate::services::costing::{CostingMode, LedgerLine};

/// Costing mode per warehouse, read from the catalog
pub async fn load_costing_modes<C: ConnectionTrait>(
    conn: &C,
) -> Result<HashMap<Uuid, CostingMode>, ServiceError> {
    let warehouses = warehouse::Entity::find()
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(warehouses
        .into_iter()
        .map(|w| (w.id, CostingMode::from_flag(w.auto_update_average_cost)))
        .collect())
}

/// All publicado movement lines, chronologically ordered (movement date,
/// then insertion order, then line number). Borrador and anulado movements
/// never appear: the former were never applied, the latter are replayed as
/// if they had never existed. `item_id` narrows the stream to one item.
pub async fn load_published_lines<C: ConnectionTrait>(
    conn: &C,
    item_id: Option<Uuid>,
) -> Result<Vec<LedgerLine>, ServiceError> {
    let movements = movement::Entity::find()
        .filter(movement::Column::State.eq(MovementState::Publicado.as_str()))
        .order_by_asc(movement::Column::MovementDate)
        .order_by_asc(movement::Column::CreatedAt)
        .order_by_asc(movement::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if movements.is_empty() {
        return Ok(Vec::new());
    }

    let movement_ids: Vec<Uuid> = movements.iter().map(|m| m.id).collect();
    let mut detail_query = movement_detail::Entity::find()
        .filter(movement_detail::Column::MovementId.is_in(movement_ids))
        .order_by_asc(movement_detail::Column::LineNumber);
    if let Some(item_id) = item_id {
        detail_query = detail_query.filter(movement_detail::Column::ItemId.eq(item_id));
    }
    let details = detail_query
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut by_movement: HashMap<Uuid, Vec<movement_detail::Model>> = HashMap::new();
    for detail in details {
        by_movement.entry(detail.movement_id).or_default().push(detail);
    }

    let mut lines = Vec::new();
    for movement in &movements {
        let Some(details) = by_movement.get(&movement.id) else {
            continue;
        };
        let movement_type = movement.type_enum().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Movement {} has unknown type '{}'",
                movement.id, movement.movement_type
            ))
        })?;
        let subtype = movement
            .subtype
            .as_deref()
            .and_then(MovementSubtype::from_str);

        for detail in details {
            lines.push(LedgerLine {
                movement_id: movement.id,
                movement_date: movement.movement_date,
                movement_type,
                subtype,
                reference_document: movement.reference_document.clone(),
                line_number: detail.line_number,
                item_id: detail.item_id,
                source_warehouse_id: movement.source_warehouse_id,
                destination_warehouse_id: movement.destination_warehouse_id,
                quantity: detail.quantity,
                unit_cost: detail.unit_cost,
            });
        }
    }

    Ok(lines)
}
