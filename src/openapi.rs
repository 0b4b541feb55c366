use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::errors::ErrorResponse;
use crate::handlers::{audit, common, kardex, movements, stock};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Kardex API",
        description = "Per-warehouse inventory valuation under weighted-average costing: movement lifecycle, kardex ledger queries, audited cost corrections and full-history recalculation"
    ),
    paths(
        movements::create_movement,
        movements::get_movement,
        movements::list_movements,
        movements::update_movement,
        movements::replace_details,
        movements::publish_movement,
        movements::void_movement,
        kardex::get_kardex,
        audit::get_audit_trail,
        stock::list_stock_positions,
        stock::recalculate_costs,
        stock::override_average_cost,
    ),
    components(schemas(
        ErrorResponse,
        common::PaginationMeta,
        movements::CreateMovementRequest,
        movements::CreateMovementLineRequest,
        movements::UpdateMovementRequest,
        movements::ReplaceDetailsRequest,
        movements::MovementResponse,
        movements::MovementDetailResponse,
        movements::MovementListResponse,
        kardex::KardexResponse,
        kardex::KardexRowResponse,
        kardex::KardexSummaryResponse,
        audit::AuditTrailResponse,
        audit::AuditEntryResponse,
        stock::StockPositionResponse,
        stock::StockPositionListResponse,
        stock::RecalculateRequest,
        stock::RecalculationResponse,
        stock::OverrideCostRequest,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "movements", description = "Movement lifecycle"),
        (name = "kardex", description = "Ledger reconstruction"),
        (name = "stock", description = "Stock positions, recalculation and overrides"),
        (name = "audit", description = "Cost correction trail")
    )
)]
pub struct ApiDoc;
