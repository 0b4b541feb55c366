use axum::{
    extract::{Query, State},
    response::Response,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{consts as perm, AuthUser};
use crate::entities::movement::MovementType;
use crate::errors::ServiceError;
use crate::handlers::common::{page_or_default, per_page_or_default, success_response, PaginationMeta};
use crate::services::kardex::{KardexQuery, KardexReport, KardexRow};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_kardex))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct KardexParams {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub movement_type: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KardexRowResponse {
    pub movement_id: Uuid,
    pub movement_date: DateTime<Utc>,
    pub movement_type: String,
    pub subtype: Option<String>,
    pub reference_document: Option<String>,
    pub line_number: i32,
    #[schema(value_type = String)]
    pub entry_quantity: Decimal,
    #[schema(value_type = String)]
    pub entry_value: Decimal,
    #[schema(value_type = String)]
    pub exit_quantity: Decimal,
    #[schema(value_type = String)]
    pub exit_value: Decimal,
    #[schema(value_type = String)]
    pub balance_quantity: Decimal,
    #[schema(value_type = String)]
    pub average_cost: Decimal,
    #[schema(value_type = String)]
    pub balance_value: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KardexSummaryResponse {
    #[schema(value_type = String)]
    pub total_entry_quantity: Decimal,
    #[schema(value_type = String)]
    pub total_entry_value: Decimal,
    #[schema(value_type = String)]
    pub total_exit_quantity: Decimal,
    #[schema(value_type = String)]
    pub total_exit_value: Decimal,
    #[schema(value_type = String)]
    pub final_balance: Decimal,
    #[schema(value_type = String)]
    pub final_valuation: Decimal,
    #[schema(value_type = String)]
    pub average_cost: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KardexResponse {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub rows: Vec<KardexRowResponse>,
    pub summary: KardexSummaryResponse,
    pub pagination: PaginationMeta,
}

fn row_response(row: KardexRow) -> KardexRowResponse {
    KardexRowResponse {
        movement_id: row.movement_id,
        movement_date: row.movement_date,
        movement_type: row.movement_type.as_str().to_string(),
        subtype: row.subtype.map(|s| s.as_str().to_string()),
        reference_document: row.reference_document,
        line_number: row.line_number,
        entry_quantity: row.entry_quantity,
        entry_value: row.entry_value,
        exit_quantity: row.exit_quantity,
        exit_value: row.exit_value,
        balance_quantity: row.balance_quantity,
        average_cost: row.average_cost,
        balance_value: row.balance_value,
    }
}

fn report_response(report: KardexReport) -> KardexResponse {
    let pagination = PaginationMeta::new(report.page, report.per_page, report.total_rows);
    KardexResponse {
        item_id: report.item_id,
        warehouse_id: report.warehouse_id,
        rows: report.rows.into_iter().map(row_response).collect(),
        summary: KardexSummaryResponse {
            total_entry_quantity: report.summary.total_entry_quantity,
            total_entry_value: report.summary.total_entry_value,
            total_exit_quantity: report.summary.total_exit_quantity,
            total_exit_value: report.summary.total_exit_value,
            final_balance: report.summary.final_balance,
            final_valuation: report.summary.final_valuation,
            average_cost: report.summary.average_cost,
        },
        pagination,
    }
}

/// Kardex ledger view for one (item, warehouse) pair
#[utoipa::path(
    get,
    path = "/api/v1/kardex",
    params(KardexParams),
    responses(
        (status = 200, description = "Kardex rows and summary returned", body = KardexResponse),
        (status = 404, description = "Item or warehouse not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_kardex(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<KardexParams>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::KARDEX_READ)?;

    let movement_type = params
        .movement_type
        .as_deref()
        .map(|value| {
            MovementType::from_str(value).ok_or_else(|| {
                ServiceError::ValidationError(format!("Unknown movement type '{}'", value))
            })
        })
        .transpose()?;

    let report = state
        .services
        .kardex
        .get_kardex(KardexQuery {
            item_id: params.item_id,
            warehouse_id: params.warehouse_id,
            from: params.from,
            to: params.to,
            movement_type,
            page: page_or_default(params.page),
            per_page: per_page_or_default(params.per_page),
        })
        .await?;

    Ok(success_response(report_response(report)))
}
