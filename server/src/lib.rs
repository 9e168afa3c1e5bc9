//! tabsync server - the shared backend of tabsync devices.
//!
//! Devices push rows to per-table endpoints under `/rest`, pull them back
//! with column selectors, and follow other devices' writes through the
//! `/realtime` WebSocket feed. Every request acts for the tenant named in
//! its `X-Tenant-Id` header and never sees another tenant's rows.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod websocket;

use crate::config::Config;
use crate::db::Pool;
use crate::websocket::ConnectionManager;
use axum::Router;
use std::sync::Arc;
use tabsync_engine::AdapterRegistry;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
    pub registry: Arc<AdapterRegistry>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(pool: Pool, config: Config) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            registry: Arc::new(AdapterRegistry::standard()),
            conn_manager: ConnectionManager::new_shared(),
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
