//! Kardex API Library
//!
//! Per-warehouse inventory quantities and valuations under weighted-average
//! costing, with an auditable movement ledger and full-history cost
//! recalculation.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod openapi;
pub mod services;

use std::sync::Arc;

use axum::{response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::events::EventSender;
use crate::services::audit::AuditService;
use crate::services::kardex::KardexService;
use crate::services::movements::MovementService;
use crate::services::recalculation::RecalculationService;
use crate::services::stock::StockQueryService;
use crate::services::stock_locks::WarehouseLocks;

/// Shared service handles wired once at startup
#[derive(Clone)]
pub struct AppServices {
    pub movements: Arc<MovementService>,
    pub kardex: Arc<KardexService>,
    pub recalculation: Arc<RecalculationService>,
    pub audit: Arc<AuditService>,
    pub stock: Arc<StockQueryService>,
}

impl AppServices {
    pub fn build(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        publish_retries: u32,
    ) -> Self {
        let locks = Arc::new(WarehouseLocks::new());

        Self {
            movements: Arc::new(MovementService::new(
                db.clone(),
                event_sender.clone(),
                locks.clone(),
                publish_retries,
            )),
            kardex: Arc::new(KardexService::new(db.clone())),
            recalculation: Arc::new(RecalculationService::new(
                db.clone(),
                event_sender.clone(),
                locks,
            )),
            audit: Arc::new(AuditService::new(db.clone(), event_sender)),
            stock: Arc::new(StockQueryService::new(db)),
        }
    }
}

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: EventSender,
    pub token_verifier: Arc<auth::TokenVerifier>,
    pub services: AppServices,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: config::AppConfig, event_sender: EventSender) -> Self {
        let token_verifier = Arc::new(auth::TokenVerifier::new(&config.jwt_secret));
        let services = AppServices::build(db.clone(), event_sender.clone(), config.publish_retries);
        Self {
            db,
            config,
            event_sender,
            token_verifier,
            services,
        }
    }
}

/// Builds the application router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/movements", handlers::movements::router())
        .nest("/api/v1/kardex", handlers::kardex::router())
        .nest("/api/v1/audit-trail", handlers::audit::router())
        .nest("/api/v1/stock", handlers::stock::router())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
