use axum::{
    extract::{Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{consts as perm, AuthUser};
use crate::entities::stock_position;
use crate::errors::ServiceError;
use crate::handlers::common::{
    page_or_default, per_page_or_default, success_response, validate_input, PaginationMeta,
};
use crate::services::stock::StockPositionFilter;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_stock_positions))
        .route("/recalculate", post(recalculate_costs))
        .route("/override-cost", post(override_average_cost))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StockPositionParams {
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RecalculateRequest {
    /// Warehouse to rebuild; omit to recalculate every warehouse
    pub warehouse_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OverrideCostRequest {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    #[schema(value_type = String, example = "7.2500")]
    pub new_cost: Decimal,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StockPositionResponse {
    pub id: Uuid,
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    #[schema(value_type = String)]
    pub quantity_on_hand: Decimal,
    #[schema(value_type = String)]
    pub average_unit_cost: Decimal,
    #[schema(value_type = Option<String>)]
    pub min_quantity: Option<Decimal>,
    #[schema(value_type = Option<String>)]
    pub max_quantity: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StockPositionListResponse {
    pub positions: Vec<StockPositionResponse>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecalculationResponse {
    pub warehouse_id: Option<Uuid>,
    pub corrected_positions: u64,
    pub positions: Vec<StockPositionResponse>,
}

fn position_response(position: stock_position::Model) -> StockPositionResponse {
    StockPositionResponse {
        id: position.id,
        item_id: position.item_id,
        warehouse_id: position.warehouse_id,
        quantity_on_hand: position.quantity_on_hand,
        average_unit_cost: position.average_unit_cost,
        min_quantity: position.min_quantity,
        max_quantity: position.max_quantity,
        updated_at: position.updated_at,
    }
}

/// List stock positions
#[utoipa::path(
    get,
    path = "/api/v1/stock",
    params(StockPositionParams),
    responses((status = 200, description = "Stock positions returned", body = StockPositionListResponse)),
    security(("bearer_auth" = []))
)]
pub async fn list_stock_positions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<StockPositionParams>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::STOCK_READ)?;

    let page = page_or_default(params.page);
    let per_page = per_page_or_default(params.per_page);
    let (positions, total) = state
        .services
        .stock
        .list_positions(
            StockPositionFilter {
                item_id: params.item_id,
                warehouse_id: params.warehouse_id,
            },
            page,
            per_page,
        )
        .await?;

    let response = StockPositionListResponse {
        positions: positions.into_iter().map(position_response).collect(),
        pagination: PaginationMeta::new(page, per_page, total),
    };
    Ok(success_response(response))
}

/// Rebuild stock positions by replaying published history
#[utoipa::path(
    post,
    path = "/api/v1/stock/recalculate",
    request_body = RecalculateRequest,
    responses(
        (status = 200, description = "Recalculation finished", body = RecalculationResponse),
        (status = 404, description = "Warehouse not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn recalculate_costs(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<RecalculateRequest>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::STOCK_RECALCULATE)?;

    let outcome = state
        .services
        .recalculation
        .recalculate(&user.user_id, payload.warehouse_id)
        .await?;

    let response = RecalculationResponse {
        warehouse_id: outcome.warehouse_id,
        corrected_positions: outcome.corrected_positions,
        positions: outcome.positions.into_iter().map(position_response).collect(),
    };
    Ok(success_response(response))
}

/// Manually override the average cost of one stock position (audited)
#[utoipa::path(
    post,
    path = "/api/v1/stock/override-cost",
    request_body = OverrideCostRequest,
    responses(
        (status = 200, description = "Average cost overridden", body = StockPositionResponse),
        (status = 404, description = "Stock position not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn override_average_cost(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<OverrideCostRequest>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::STOCK_OVERRIDE_COST)?;
    validate_input(&payload)?;

    let position = state
        .services
        .audit
        .override_average_cost(
            &user.user_id,
            payload.item_id,
            payload.warehouse_id,
            payload.new_cost,
            payload.reason,
        )
        .await?;

    Ok(success_response(position_response(position)))
}
