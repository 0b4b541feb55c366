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
use crate::entities::audit_entry;
use crate::errors::ServiceError;
use crate::handlers::common::{page_or_default, per_page_or_default, success_response, PaginationMeta};
use crate::services::audit::AuditTrailFilter;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_audit_trail))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditTrailParams {
    pub item_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditEntryResponse {
    pub id: Uuid,
    pub user_id: String,
    pub movement_id: Option<Uuid>,
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    #[schema(value_type = String)]
    pub previous_cost: Decimal,
    #[schema(value_type = String)]
    pub new_cost: Decimal,
    #[schema(value_type = String)]
    pub previous_quantity: Decimal,
    #[schema(value_type = String)]
    pub new_quantity: Decimal,
    #[schema(value_type = String)]
    pub cost_difference: Decimal,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditTrailResponse {
    pub entries: Vec<AuditEntryResponse>,
    pub pagination: PaginationMeta,
}

fn entry_response(entry: audit_entry::Model) -> AuditEntryResponse {
    AuditEntryResponse {
        id: entry.id,
        user_id: entry.user_id,
        movement_id: entry.movement_id,
        item_id: entry.item_id,
        warehouse_id: entry.warehouse_id,
        previous_cost: entry.previous_cost,
        new_cost: entry.new_cost,
        previous_quantity: entry.previous_quantity,
        new_quantity: entry.new_quantity,
        cost_difference: entry.cost_difference,
        reason: entry.reason,
        created_at: entry.created_at,
    }
}

/// Cost correction audit trail, newest first
#[utoipa::path(
    get,
    path = "/api/v1/audit-trail",
    params(AuditTrailParams),
    responses((status = 200, description = "Audit entries returned", body = AuditTrailResponse)),
    security(("bearer_auth" = []))
)]
pub async fn get_audit_trail(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<AuditTrailParams>,
) -> Result<Response, ServiceError> {
    user.require_permission(perm::AUDIT_READ)?;

    let page = page_or_default(params.page);
    let per_page = per_page_or_default(params.per_page);
    let (entries, total) = state
        .services
        .audit
        .list(
            AuditTrailFilter {
                item_id: params.item_id,
                warehouse_id: params.warehouse_id,
            },
            page,
            per_page,
        )
        .await?;

    let response = AuditTrailResponse {
        entries: entries.into_iter().map(entry_response).collect(),
        pagination: PaginationMeta::new(page, per_page, total),
    };
    Ok(success_response(response))
}
