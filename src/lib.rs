pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::{config::AppConfig, db::DbPool, events::EventSender, handlers::AppServices};

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: Option<Arc<EventSender>>,
    pub services: AppServices,
}

/// Lightweight liveness probe.
async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe: verifies the database connection is usable.
async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.db.ping().await {
        Ok(()) => "connected",
        Err(_) => "unavailable",
    };
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "database": database,
    }))
}

/// Builds the versioned API router. State is applied by the caller.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .nest("/orders", handlers::orders::routes())
        .nest(
            "/payments",
            handlers::payments::routes().merge(handlers::payment_webhooks::routes()),
        )
}
