use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::movement::{self, MovementState, MovementSubtype, MovementType};
use crate::entities::{item, movement_detail, stock_position, warehouse};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::costing::{self, CostingMode, LedgerLine, PositionKey, PositionState};
use crate::services::stock_locks::WarehouseLocks;

/// New detail line for a draft movement
#[derive(Debug, Clone)]
pub struct NewMovementLine {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
}

/// Input for creating a draft movement
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub movement_type: MovementType,
    pub subtype: Option<MovementSubtype>,
    pub movement_date: DateTime<Utc>,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    pub third_party: Option<String>,
    pub reference_document: Option<String>,
    pub observation: Option<String>,
    pub details: Vec<NewMovementLine>,
}

/// Header fields editable while the movement is a draft
#[derive(Debug, Clone, Default)]
pub struct UpdateMovementHeader {
    pub movement_date: Option<DateTime<Utc>>,
    pub third_party: Option<String>,
    pub reference_document: Option<String>,
    pub observation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MovementWithDetails {
    pub movement: movement::Model,
    pub details: Vec<movement_detail::Model>,
}

#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub state: Option<MovementState>,
    pub movement_type: Option<MovementType>,
    pub warehouse_id: Option<Uuid>,
}

/// Service owning the movement lifecycle: draft creation and editing,
/// publishing through the costing engine, and voiding.
pub struct MovementService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    locks: Arc<WarehouseLocks>,
    publish_retries: u32,
}

impl MovementService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        locks: Arc<WarehouseLocks>,
        publish_retries: u32,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            locks,
            publish_retries: publish_retries.max(1),
        }
    }

    /// Creates a movement in borrador state
    #[instrument(skip(self, input), fields(movement_type = input.movement_type.as_str()))]
    pub async fn create_movement(
        &self,
        user_id: &str,
        input: NewMovement,
    ) -> Result<MovementWithDetails, ServiceError> {
        validate_header(&input)?;
        validate_lines(&input.details)?;

        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        if let Some(source_id) = input.source_warehouse_id {
            require_active_warehouse(&txn, source_id).await?;
        }
        if let Some(destination_id) = input.destination_warehouse_id {
            require_active_warehouse(&txn, destination_id).await?;
        }
        require_active_items(&txn, input.details.iter().map(|d| d.item_id)).await?;

        let now = Utc::now();
        let movement_id = Uuid::new_v4();
        let header = movement::ActiveModel {
            id: Set(movement_id),
            movement_type: Set(input.movement_type.as_str().to_string()),
            subtype: Set(input.subtype.map(|s| s.as_str().to_string())),
            movement_date: Set(input.movement_date),
            source_warehouse_id: Set(input.source_warehouse_id),
            destination_warehouse_id: Set(input.destination_warehouse_id),
            third_party: Set(input.third_party),
            reference_document: Set(input.reference_document),
            observation: Set(input.observation),
            state: Set(MovementState::Borrador.as_str().to_string()),
            created_by: Set(user_id.to_string()),
            published_at: Set(None),
            voided_at: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(None),
        };
        let movement = header.insert(&txn).await.map_err(ServiceError::db_error)?;

        let details = insert_details(&txn, movement_id, &input.details, now).await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(%movement_id, "movement created as draft");
        Ok(MovementWithDetails { movement, details })
    }

    pub async fn get_movement(&self, id: Uuid) -> Result<MovementWithDetails, ServiceError> {
        let db = self.db_pool.as_ref();
        load_movement_with_details(db, id).await
    }

    pub async fn list_movements(
        &self,
        filter: MovementFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<movement::Model>, u64), ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = movement::Entity::find();
        if let Some(state) = filter.state {
            query = query.filter(movement::Column::State.eq(state.as_str()));
        }
        if let Some(movement_type) = filter.movement_type {
            query = query.filter(movement::Column::MovementType.eq(movement_type.as_str()));
        }
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(
                movement::Column::SourceWarehouseId
                    .eq(warehouse_id)
                    .or(movement::Column::DestinationWarehouseId.eq(warehouse_id)),
            );
        }

        let paginator = query
            .order_by_desc(movement::Column::MovementDate)
            .order_by_desc(movement::Column::CreatedAt)
            .paginate(db, per_page.max(1));

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::db_error)?;
        let movements = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((movements, total))
    }

    /// Updates header fields; legal only while the movement is borrador
    #[instrument(skip(self, update))]
    pub async fn update_header(
        &self,
        id: Uuid,
        update: UpdateMovementHeader,
    ) -> Result<MovementWithDetails, ServiceError> {
        let db = self.db_pool.as_ref();
        let current = load_movement_with_details(db, id).await?;
        require_state(&current.movement, MovementState::Borrador)?;

        let mut query = movement::Entity::update_many()
            .col_expr(
                movement::Column::Version,
                Expr::value(current.movement.version + 1),
            )
            .col_expr(movement::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(movement_date) = update.movement_date {
            query = query.col_expr(movement::Column::MovementDate, Expr::value(movement_date));
        }
        if let Some(third_party) = update.third_party {
            query = query.col_expr(movement::Column::ThirdParty, Expr::value(third_party));
        }
        if let Some(reference_document) = update.reference_document {
            query = query.col_expr(
                movement::Column::ReferenceDocument,
                Expr::value(reference_document),
            );
        }
        if let Some(observation) = update.observation {
            query = query.col_expr(movement::Column::Observation, Expr::value(observation));
        }

        // Version filter catches a publish racing the edit
        let result = query
            .filter(movement::Column::Id.eq(id))
            .filter(movement::Column::Version.eq(current.movement.version))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(id));
        }

        load_movement_with_details(db, id).await
    }

    /// Replaces the detail lines of a draft movement
    #[instrument(skip(self, lines))]
    pub async fn replace_details(
        &self,
        id: Uuid,
        lines: Vec<NewMovementLine>,
    ) -> Result<MovementWithDetails, ServiceError> {
        validate_lines(&lines)?;

        let db = self.db_pool.as_ref();
        let current = load_movement_with_details(db, id).await?;
        require_state(&current.movement, MovementState::Borrador)?;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;
        require_active_items(&txn, lines.iter().map(|l| l.item_id)).await?;

        movement_detail::Entity::delete_many()
            .filter(movement_detail::Column::MovementId.eq(id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        insert_details(&txn, id, &lines, Utc::now()).await?;

        // Version filter catches a publish racing the edit
        let result = movement::Entity::update_many()
            .col_expr(
                movement::Column::Version,
                Expr::value(current.movement.version + 1),
            )
            .col_expr(movement::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(movement::Column::Id.eq(id))
            .filter(movement::Column::Version.eq(current.movement.version))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(id));
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        load_movement_with_details(db, id).await
    }

    /// Publishes a draft movement, applying every line through the costing
    /// engine in one transaction. Retries on optimistic-lock collisions.
    #[instrument(skip(self))]
    pub async fn publish(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<MovementWithDetails, ServiceError> {
        let mut attempt = 0;
        let published = loop {
            attempt += 1;
            match self.try_publish(id).await {
                Err(ServiceError::ConcurrentModification(row)) if attempt < self.publish_retries => {
                    warn!(%id, %row, attempt, "publish hit a concurrent update, retrying");
                    continue;
                }
                result => break result?,
            }
        };

        info!(%id, user_id, "movement published");
        self.event_sender
            .send(Event::MovementPublished {
                movement_id: id,
                movement_type: published.movement.movement_type.clone(),
                line_count: published.details.len(),
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(published)
    }

    async fn try_publish(&self, id: Uuid) -> Result<MovementWithDetails, ServiceError> {
        let db = self.db_pool.as_ref();

        let preview = load_movement_with_details(db, id).await?;
        require_transition(&preview.movement, MovementState::Publicado)?;
        let warehouse_ids = affected_warehouses(&preview.movement);

        let _guards = self.locks.read_many(&warehouse_ids).await;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let current = load_movement_with_details(&txn, id).await?;
        require_transition(&current.movement, MovementState::Publicado)?;
        if current.details.is_empty() {
            return Err(ServiceError::ValidationError(
                "Movement has no detail lines".to_string(),
            ));
        }

        let movement_type = current.movement.type_enum().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Movement {} has unknown type '{}'",
                id, current.movement.movement_type
            ))
        })?;

        let mut modes = HashMap::new();
        for warehouse_id in &warehouse_ids {
            let warehouse = require_active_warehouse(&txn, *warehouse_id).await?;
            modes.insert(
                warehouse.id,
                CostingMode::from_flag(warehouse.auto_update_average_cost),
            );
        }
        require_active_items(&txn, current.details.iter().map(|d| d.item_id)).await?;

        let lines = ledger_lines(&current.movement, movement_type, &current.details);
        for line in &lines {
            if line.movement_type == MovementType::Entrada && line.unit_cost.is_none() {
                return Err(ServiceError::InvalidCost(format!(
                    "line {} (item {}): entrada requires a unit cost",
                    line.line_number, line.item_id
                )));
            }
        }

        let keys = position_keys(&lines);
        let existing = load_positions(&txn, &keys).await?;
        let mut positions: HashMap<PositionKey, PositionState> = existing
            .iter()
            .map(|(key, row)| {
                (
                    *key,
                    PositionState {
                        quantity: row.quantity_on_hand,
                        average_cost: row.average_unit_cost,
                    },
                )
            })
            .collect();

        let mut touched: HashSet<PositionKey> = HashSet::new();
        for line in &lines {
            let effects = costing::apply_line(&mut positions, &modes, line)?;
            for effect in effects {
                touched.insert((line.item_id, effect.warehouse_id));
            }
        }

        persist_positions(&txn, &positions, &existing, &touched).await?;
        mark_state(
            &txn,
            &current.movement,
            MovementState::Publicado,
            movement::Column::PublishedAt,
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        load_movement_with_details(db, id).await
    }

    /// Voids a published movement by applying the inverse quantity effect.
    /// Average costs are left as they are; a recalculation pass is the
    /// reconciliation path when the history-implied average matters.
    #[instrument(skip(self))]
    pub async fn void(&self, user_id: &str, id: Uuid) -> Result<MovementWithDetails, ServiceError> {
        let mut attempt = 0;
        let voided = loop {
            attempt += 1;
            match self.try_void(id).await {
                Err(ServiceError::ConcurrentModification(row)) if attempt < self.publish_retries => {
                    warn!(%id, %row, attempt, "void hit a concurrent update, retrying");
                    continue;
                }
                result => break result?,
            }
        };

        info!(%id, user_id, "movement voided");
        self.event_sender
            .send(Event::MovementVoided {
                movement_id: id,
                movement_type: voided.movement.movement_type.clone(),
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(voided)
    }

    async fn try_void(&self, id: Uuid) -> Result<MovementWithDetails, ServiceError> {
        let db = self.db_pool.as_ref();

        let preview = load_movement_with_details(db, id).await?;
        require_transition(&preview.movement, MovementState::Anulado)?;
        let warehouse_ids = affected_warehouses(&preview.movement);

        let _guards = self.locks.read_many(&warehouse_ids).await;

        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let current = load_movement_with_details(&txn, id).await?;
        require_transition(&current.movement, MovementState::Anulado)?;

        let movement_type = current.movement.type_enum().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Movement {} has unknown type '{}'",
                id, current.movement.movement_type
            ))
        })?;

        let lines = ledger_lines(&current.movement, movement_type, &current.details);
        let keys = position_keys(&lines);
        let existing = load_positions(&txn, &keys).await?;
        let mut positions: HashMap<PositionKey, PositionState> = existing
            .iter()
            .map(|(key, row)| {
                (
                    *key,
                    PositionState {
                        quantity: row.quantity_on_hand,
                        average_cost: row.average_unit_cost,
                    },
                )
            })
            .collect();

        let mut touched: HashSet<PositionKey> = HashSet::new();
        for line in &lines {
            apply_inverse_line(&mut positions, line)?;
            if let Some(source_id) = line.source_warehouse_id {
                touched.insert((line.item_id, source_id));
            }
            if let Some(destination_id) = line.destination_warehouse_id {
                touched.insert((line.item_id, destination_id));
            }
        }

        persist_positions(&txn, &positions, &existing, &touched).await?;
        mark_state(
            &txn,
            &current.movement,
            MovementState::Anulado,
            movement::Column::VoidedAt,
        )
        .await?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        load_movement_with_details(db, id).await
    }
}

fn validate_header(input: &NewMovement) -> Result<(), ServiceError> {
    if input.movement_type.requires_source() && input.source_warehouse_id.is_none() {
        return Err(ServiceError::ValidationError(format!(
            "{} movements require a source warehouse",
            input.movement_type.as_str()
        )));
    }
    if input.movement_type.requires_destination() && input.destination_warehouse_id.is_none() {
        return Err(ServiceError::ValidationError(format!(
            "{} movements require a destination warehouse",
            input.movement_type.as_str()
        )));
    }
    if input.movement_type == MovementType::Transferencia
        && input.source_warehouse_id == input.destination_warehouse_id
    {
        return Err(ServiceError::ValidationError(
            "Transferencia source and destination warehouses must differ".to_string(),
        ));
    }
    Ok(())
}

fn validate_lines(lines: &[NewMovementLine]) -> Result<(), ServiceError> {
    for (index, line) in lines.iter().enumerate() {
        costing::validate_quantity(line.quantity).map_err(|e| match e {
            ServiceError::InvalidQuantity(msg) => {
                ServiceError::InvalidQuantity(format!("line {}: {}", index + 1, msg))
            }
            other => other,
        })?;
        if let Some(unit_cost) = line.unit_cost {
            costing::validate_cost(unit_cost).map_err(|e| match e {
                ServiceError::InvalidCost(msg) => {
                    ServiceError::InvalidCost(format!("line {}: {}", index + 1, msg))
                }
                other => other,
            })?;
        }
    }
    Ok(())
}

fn require_state(
    movement: &movement::Model,
    expected: MovementState,
) -> Result<(), ServiceError> {
    match movement.state_enum() {
        Some(state) if state == expected => Ok(()),
        Some(state) => Err(ServiceError::Conflict(format!(
            "Movement {} is {}, expected {}",
            movement.id,
            state.as_str(),
            expected.as_str()
        ))),
        None => Err(ServiceError::InternalError(format!(
            "Movement {} has unknown state '{}'",
            movement.id, movement.state
        ))),
    }
}

fn require_transition(
    movement: &movement::Model,
    to: MovementState,
) -> Result<(), ServiceError> {
    match movement.state_enum() {
        Some(state) if state.can_transition(to) => Ok(()),
        Some(state) => Err(ServiceError::Conflict(format!(
            "Movement {} cannot transition from {} to {}",
            movement.id,
            state.as_str(),
            to.as_str()
        ))),
        None => Err(ServiceError::InternalError(format!(
            "Movement {} has unknown state '{}'",
            movement.id, movement.state
        ))),
    }
}

fn affected_warehouses(movement: &movement::Model) -> Vec<Uuid> {
    let mut ids = Vec::new();
    if let Some(source_id) = movement.source_warehouse_id {
        ids.push(source_id);
    }
    if let Some(destination_id) = movement.destination_warehouse_id {
        ids.push(destination_id);
    }
    ids
}

fn ledger_lines(
    movement: &movement::Model,
    movement_type: MovementType,
    details: &[movement_detail::Model],
) -> Vec<LedgerLine> {
    let subtype = movement
        .subtype
        .as_deref()
        .and_then(MovementSubtype::from_str);

    details
        .iter()
        .map(|detail| LedgerLine {
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
        })
        .collect()
}

fn position_keys(lines: &[LedgerLine]) -> Vec<PositionKey> {
    let mut keys = HashSet::new();
    for line in lines {
        if let Some(source_id) = line.source_warehouse_id {
            keys.insert((line.item_id, source_id));
        }
        if let Some(destination_id) = line.destination_warehouse_id {
            keys.insert((line.item_id, destination_id));
        }
    }
    keys.into_iter().collect()
}

/// The inverse ledger effect used by void: entries come back out, issues go
/// back in, transfers reverse both legs. Quantities only; averages stay.
fn apply_inverse_line(
    positions: &mut HashMap<PositionKey, PositionState>,
    line: &LedgerLine,
) -> Result<(), ServiceError> {
    let reverse_out = |positions: &mut HashMap<PositionKey, PositionState>,
                       warehouse_id: Uuid|
     -> Result<(), ServiceError> {
        let key = (line.item_id, warehouse_id);
        let before = positions.get(&key).copied().unwrap_or_default();
        let after = costing::apply_salida(before, line.quantity).map_err(|e| match e {
            ServiceError::InsufficientStock(msg) => ServiceError::InsufficientStock(format!(
                "line {} (item {}): voiding would drive stock negative: {}",
                line.line_number, line.item_id, msg
            )),
            other => other,
        })?;
        positions.insert(key, after);
        Ok(())
    };
    let reverse_in = |positions: &mut HashMap<PositionKey, PositionState>,
                      warehouse_id: Uuid|
     -> Result<(), ServiceError> {
        let key = (line.item_id, warehouse_id);
        let before = positions.get(&key).copied().unwrap_or_default();
        // Pinned application restores the quantity without touching the average
        let after = costing::apply_entrada(
            before,
            line.quantity,
            before.average_cost,
            CostingMode::Pinned,
        )?;
        positions.insert(key, after);
        Ok(())
    };

    match line.movement_type {
        MovementType::Entrada => {
            let warehouse_id = line.destination_warehouse_id.ok_or_else(|| {
                ServiceError::InternalError("Entrada movement lost its destination".to_string())
            })?;
            reverse_out(positions, warehouse_id)
        }
        MovementType::Salida => {
            let warehouse_id = line.source_warehouse_id.ok_or_else(|| {
                ServiceError::InternalError("Salida movement lost its source".to_string())
            })?;
            reverse_in(positions, warehouse_id)
        }
        MovementType::Transferencia => {
            let source_id = line.source_warehouse_id.ok_or_else(|| {
                ServiceError::InternalError("Transferencia movement lost its source".to_string())
            })?;
            let destination_id = line.destination_warehouse_id.ok_or_else(|| {
                ServiceError::InternalError(
                    "Transferencia movement lost its destination".to_string(),
                )
            })?;
            reverse_out(positions, destination_id)?;
            reverse_in(positions, source_id)
        }
    }
}

async fn load_movement_with_details<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<MovementWithDetails, ServiceError> {
    let movement = movement::Entity::find_by_id(id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Movement {} not found", id)))?;

    let details = movement_detail::Entity::find()
        .filter(movement_detail::Column::MovementId.eq(id))
        .order_by_asc(movement_detail::Column::LineNumber)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(MovementWithDetails { movement, details })
}

async fn insert_details<C: ConnectionTrait>(
    conn: &C,
    movement_id: Uuid,
    lines: &[NewMovementLine],
    now: DateTime<Utc>,
) -> Result<Vec<movement_detail::Model>, ServiceError> {
    let mut details = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        let detail = movement_detail::ActiveModel {
            id: Set(Uuid::new_v4()),
            movement_id: Set(movement_id),
            line_number: Set((index + 1) as i32),
            item_id: Set(line.item_id),
            quantity: Set(line.quantity),
            unit_cost: Set(line.unit_cost),
            created_at: Set(now),
        };
        details.push(detail.insert(conn).await.map_err(ServiceError::db_error)?);
    }
    Ok(details)
}

async fn require_active_warehouse<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<warehouse::Model, ServiceError> {
    let warehouse = warehouse::Entity::find_by_id(id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Warehouse {} not found", id)))?;

    if !warehouse.is_active {
        return Err(ServiceError::NotFound(format!(
            "Warehouse {} is inactive",
            id
        )));
    }
    Ok(warehouse)
}

async fn require_active_items<C: ConnectionTrait>(
    conn: &C,
    item_ids: impl Iterator<Item = Uuid>,
) -> Result<(), ServiceError> {
    let ids: HashSet<Uuid> = item_ids.collect();
    if ids.is_empty() {
        return Ok(());
    }

    let found = item::Entity::find()
        .filter(item::Column::Id.is_in(ids.iter().copied().collect::<Vec<_>>()))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let by_id: HashMap<Uuid, &item::Model> = found.iter().map(|i| (i.id, i)).collect();
    for id in &ids {
        match by_id.get(id) {
            None => return Err(ServiceError::NotFound(format!("Item {} not found", id))),
            Some(item) if !item.is_active => {
                return Err(ServiceError::NotFound(format!("Item {} is inactive", id)));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

async fn load_positions<C: ConnectionTrait>(
    conn: &C,
    keys: &[PositionKey],
) -> Result<HashMap<PositionKey, stock_position::Model>, ServiceError> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }

    let item_ids: Vec<Uuid> = keys.iter().map(|(item_id, _)| *item_id).collect();
    let warehouse_ids: Vec<Uuid> = keys.iter().map(|(_, warehouse_id)| *warehouse_id).collect();

    let rows = stock_position::Entity::find()
        .filter(stock_position::Column::ItemId.is_in(item_ids))
        .filter(stock_position::Column::WarehouseId.is_in(warehouse_ids))
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let wanted: HashSet<PositionKey> = keys.iter().copied().collect();
    Ok(rows
        .into_iter()
        .filter(|row| wanted.contains(&(row.item_id, row.warehouse_id)))
        .map(|row| ((row.item_id, row.warehouse_id), row))
        .collect())
}

fn is_unique_violation(err: &DbErr) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("unique") || message.contains("duplicate")
}

/// Writes the computed positions back: version-checked updates for existing
/// rows, lazy inserts for first-touch pairs. A lost version race surfaces as
/// ConcurrentModification so the caller can retry the whole mutation.
async fn persist_positions<C: ConnectionTrait>(
    conn: &C,
    positions: &HashMap<PositionKey, PositionState>,
    existing: &HashMap<PositionKey, stock_position::Model>,
    touched: &HashSet<PositionKey>,
) -> Result<(), ServiceError> {
    let now = Utc::now();

    for key in touched {
        let state = positions.get(key).copied().unwrap_or_default();

        match existing.get(key) {
            Some(row) => {
                let update = stock_position::Entity::update_many()
                    .col_expr(
                        stock_position::Column::QuantityOnHand,
                        Expr::value(state.quantity),
                    )
                    .col_expr(
                        stock_position::Column::AverageUnitCost,
                        Expr::value(state.average_cost),
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
            }
            None => {
                let (item_id, warehouse_id) = *key;
                let row = stock_position::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    item_id: Set(item_id),
                    warehouse_id: Set(warehouse_id),
                    quantity_on_hand: Set(state.quantity),
                    average_unit_cost: Set(state.average_cost),
                    min_quantity: Set(None),
                    max_quantity: Set(None),
                    version: Set(1),
                    created_at: Set(now),
                    updated_at: Set(None),
                };
                row.insert(conn).await.map_err(|e| {
                    if is_unique_violation(&e) {
                        ServiceError::ConcurrentModification(item_id)
                    } else {
                        ServiceError::DatabaseError(e)
                    }
                })?;
            }
        }
    }

    Ok(())
}

async fn mark_state<C: ConnectionTrait>(
    conn: &C,
    movement: &movement::Model,
    state: MovementState,
    timestamp_column: movement::Column,
) -> Result<(), ServiceError> {
    let now = Utc::now();

    let update = movement::Entity::update_many()
        .col_expr(movement::Column::State, Expr::value(state.as_str()))
        .col_expr(timestamp_column, Expr::value(now))
        .col_expr(movement::Column::UpdatedAt, Expr::value(now))
        .col_expr(movement::Column::Version, Expr::value(movement.version + 1))
        .filter(movement::Column::Id.eq(movement.id))
        .filter(movement::Column::Version.eq(movement.version))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if update.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(movement.id));
    }
    Ok(())
}
