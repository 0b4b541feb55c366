use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{consts as perm, AuthUser};
use crate::entities::movement::{MovementState, MovementSubtype, MovementType};
use crate::entities::{movement, movement_detail};
use crate::errors::ServiceError;
use crate::handlers::common::{
    created_response, page_or_default, per_page_or_default, success_response, validate_input,
    PaginationMeta,
};
use crate::services::movements::{
    MovementFilter, NewMovement, NewMovementLine, UpdateMovementHeader,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_movements).post(create_movement))
        .route("/:id", get(get_movement).put(update_movement))
        .route("/:id/details", put(replace_details))
        .route("/:id/publish", post(publish_movement))
        .route("/:id/void", post(void_movement))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateMovementLineRequest {
    pub item_id: Uuid,
    #[schema(value_type = String, example = "10.00")]
    pub quantity: Decimal,
    #[schema(value_type = Option<String>, example = "5.0000")]
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateMovementRequest {
    /// One of "entrada", "salida", "transferencia"
    pub movement_type: String,
    /// One of "compra", "venta", "devolucion_venta", "devolucion_compra"
    pub subtype: Option<String>,
    pub movement_date: Option<DateTime<Utc>>,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    #[validate(length(max = 200))]
    pub third_party: Option<String>,
    #[validate(length(max = 200))]
    pub reference_document: Option<String>,
    #[validate(length(max = 1000))]
    pub observation: Option<String>,
    #[serde(default)]
    pub details: Vec<CreateMovementLineRequest>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateMovementRequest {
    pub movement_date: Option<DateTime<Utc>>,
    #[validate(length(max = 200))]
    pub third_party: Option<String>,
    #[validate(length(max = 200))]
    pub reference_document: Option<String>,
    #[validate(length(max = 1000))]
    pub observation: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReplaceDetailsRequest {
    pub details: Vec<CreateMovementLineRequest>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct MovementListParams {
    pub state: Option<String>,
    pub movement_type: Option<String>,
    pub warehouse_id: Option<Uuid>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MovementDetailResponse {
    pub id: Uuid,
    pub line_number: i32,
    pub item_id: Uuid,
    #[schema(value_type = String)]
    pub quantity: Decimal,
    #[schema(value_type = Option<String>)]
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MovementResponse {
    pub id: Uuid,
    pub movement_type: String,
    pub subtype: Option<String>,
    pub movement_date: DateTime<Utc>,
    pub source_warehouse_id: Option<Uuid>,
    pub destination_warehouse_id: Option<Uuid>,
    pub third_party: Option<String>,
    pub reference_document: Option<String>,
    pub observation: Option<String>,
    pub state: String,
    pub created_by: String,
    pub published_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub details: Vec<MovementDetailResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MovementListResponse {
    pub movements: Vec<MovementResponse>,
    pub pagination: PaginationMeta,
}

fn map_movement_type(value: &str) -> Result<MovementType, ServiceError> {
    MovementType::from_str(value).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "Unknown movement type '{}'; expected entrada, salida or transferencia",
            value
        ))
    })
}

fn map_subtype(value: &str) -> Result<MovementSubtype, ServiceError> {
    MovementSubtype::from_str(value).ok_or_else(|| {
        ServiceError::ValidationError(format!("Unknown movement subtype '{}'", value))
    })
}

fn map_state(value: &str) -> Result<MovementState, ServiceError> {
    MovementState::from_str(value).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "Unknown movement state '{}'; expected borrador, publicado or anulado",
            value
        ))
    })
}

fn map_lines(lines: Vec<CreateMovementLineRequest>) -> Vec<NewMovementLine> {
    lines
        .into_iter()
        .map(|line| NewMovementLine {
            item_id: line.item_id,
            quantity: line.quantity,
            unit_cost: line.unit_cost,
        })
        .collect()
}

fn movement_response(
    movement: movement::Model,
    details: Vec<movement_detail::Model>,
) -> MovementResponse {
    MovementResponse {
        id: movement.id,
        movement_type: movement.movement_type,
        subtype: movement.subtype,
        movement_date: movement.movement_date,
        source_warehouse_id: movement.source_warehouse_id,
        destination_warehouse_id: movement.destination_warehouse_id,
        third_party: movement.third_party,
        reference_document: movement.reference_document,
        observation: movement.observation,
        state: movement.state,
        created_by: movement.created_by,
        published_at: movement.published_at,
        voided_at: movement.voided_at,
        created_at: movement.created_at,
        details: details
            .into_iter()
            .map(|detail| MovementDetailResponse {
                id: detail.id,
                line_number: detail.line_number,
                item_id: detail.item_id,
                quantity: detail.quantity,
                unit_cost: detail.unit_cost,
            })
            .collect(),
    }
}

/// Create a draft movement
#[utoipa::path(
    post,
    path = "/api/v1/movements",
    request_body = CreateMovementRequest,
    responses(
        (status = 201, description = "Movement created as draft", body = MovementResponse),
        (status = 400, description = "Invalid input"),
        (status = 404, description = "Referenced item or warehouse missing or inactive")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_movement(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateMovementRequest>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::MOVEMENTS_CREATE)?;
    validate_input(&payload)?;

    let movement_type = map_movement_type(&payload.movement_type)?;
    let subtype = payload.subtype.as_deref().map(map_subtype).transpose()?;

    let input = NewMovement {
        movement_type,
        subtype,
        movement_date: payload.movement_date.unwrap_or_else(Utc::now),
        source_warehouse_id: payload.source_warehouse_id,
        destination_warehouse_id: payload.destination_warehouse_id,
        third_party: payload.third_party,
        reference_document: payload.reference_document,
        observation: payload.observation,
        details: map_lines(payload.details),
    };

    let created = state
        .services
        .movements
        .create_movement(&user.user_id, input)
        .await?;
    Ok(created_response(movement_response(
        created.movement,
        created.details,
    )))
}

/// Fetch one movement with its lines
#[utoipa::path(
    get,
    path = "/api/v1/movements/{id}",
    params(("id" = Uuid, Path, description = "Movement id")),
    responses(
        (status = 200, description = "Movement returned", body = MovementResponse),
        (status = 404, description = "Movement not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_movement(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::MOVEMENTS_READ)?;

    let found = state.services.movements.get_movement(id).await?;
    Ok(success_response(movement_response(
        found.movement,
        found.details,
    )))
}

/// List movements with optional filters
#[utoipa::path(
    get,
    path = "/api/v1/movements",
    params(MovementListParams),
    responses((status = 200, description = "Movement list returned", body = MovementListResponse)),
    security(("bearer_auth" = []))
)]
pub async fn list_movements(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<MovementListParams>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::MOVEMENTS_READ)?;

    let filter = MovementFilter {
        state: params.state.as_deref().map(map_state).transpose()?,
        movement_type: params
            .movement_type
            .as_deref()
            .map(map_movement_type)
            .transpose()?,
        warehouse_id: params.warehouse_id,
    };

    let page = page_or_default(params.page);
    let per_page = per_page_or_default(params.per_page);
    let (movements, total) = state
        .services
        .movements
        .list_movements(filter, page, per_page)
        .await?;

    let response = MovementListResponse {
        movements: movements
            .into_iter()
            .map(|m| movement_response(m, Vec::new()))
            .collect(),
        pagination: PaginationMeta::new(page, per_page, total),
    };
    Ok(success_response(response))
}

/// Update header fields of a draft movement
#[utoipa::path(
    put,
    path = "/api/v1/movements/{id}",
    params(("id" = Uuid, Path, description = "Movement id")),
    request_body = UpdateMovementRequest,
    responses(
        (status = 200, description = "Movement updated", body = MovementResponse),
        (status = 409, description = "Movement is no longer a draft")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_movement(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateMovementRequest>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::MOVEMENTS_UPDATE)?;
    validate_input(&payload)?;

    let update = UpdateMovementHeader {
        movement_date: payload.movement_date,
        third_party: payload.third_party,
        reference_document: payload.reference_document,
        observation: payload.observation,
    };

    let updated = state.services.movements.update_header(id, update).await?;
    Ok(success_response(movement_response(
        updated.movement,
        updated.details,
    )))
}

/// Replace the detail lines of a draft movement
#[utoipa::path(
    put,
    path = "/api/v1/movements/{id}/details",
    params(("id" = Uuid, Path, description = "Movement id")),
    request_body = ReplaceDetailsRequest,
    responses(
        (status = 200, description = "Detail lines replaced", body = MovementResponse),
        (status = 409, description = "Movement is no longer a draft")
    ),
    security(("bearer_auth" = []))
)]
pub async fn replace_details(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReplaceDetailsRequest>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::MOVEMENTS_UPDATE)?;

    let updated = state
        .services
        .movements
        .replace_details(id, map_lines(payload.details))
        .await?;
    Ok(success_response(movement_response(
        updated.movement,
        updated.details,
    )))
}

/// Publish a draft movement, applying its ledger effect
#[utoipa::path(
    post,
    path = "/api/v1/movements/{id}/publish",
    params(("id" = Uuid, Path, description = "Movement id")),
    responses(
        (status = 200, description = "Movement published", body = MovementResponse),
        (status = 409, description = "Illegal state transition"),
        (status = 422, description = "Insufficient stock on an exit line")
    ),
    security(("bearer_auth" = []))
)]
pub async fn publish_movement(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::MOVEMENTS_PUBLISH)?;

    let published = state.services.movements.publish(&user.user_id, id).await?;
    Ok(success_response(movement_response(
        published.movement,
        published.details,
    )))
}

/// Void a published movement, reversing its quantity effect
#[utoipa::path(
    post,
    path = "/api/v1/movements/{id}/void",
    params(("id" = Uuid, Path, description = "Movement id")),
    responses(
        (status = 200, description = "Movement voided", body = MovementResponse),
        (status = 409, description = "Illegal state transition"),
        (status = 422, description = "Voiding would drive stock negative")
    ),
    security(("bearer_auth" = []))
)]
pub async fn void_movement(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::MOVEMENTS_VOID)?;

    let voided = state.services.movements.void(&user.user_id, id).await?;
    Ok(success_response(movement_response(
        voided.movement,
        voided.details,
    )))
}
