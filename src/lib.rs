//! aidstock library
//!
//! First-aid inventory ledger, stock transfers with undo, injury reports and
//! PIN-authenticated staff, served as a JSON API over any [`DocumentStore`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::auth::{PinHasher, RosterCache, SessionStore};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::services::{
    dashboard::DashboardService, inventory::InventoryService, inventory_logs::InventoryLogService,
    ledger::Ledger, reports::ReportService, staff::StaffService, transfer::TransferEngine,
};
use crate::store::DocumentStore;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
    pub inventory: InventoryService,
    pub transfers: Arc<TransferEngine>,
    pub dashboard: DashboardService,
    pub logs: InventoryLogService,
    pub staff: StaffService,
    pub reports: ReportService,
    pub sessions: SessionStore,
}

impl AppState {
    /// Wires every service over one shared store.
    pub fn new(config: AppConfig, store: Arc<dyn DocumentStore>) -> Result<Self, ServiceError> {
        let ledger = Ledger::new(store.clone(), config.max_commit_attempts);
        let hasher = PinHasher::new(config.pin_hash_memory_kib, config.pin_hash_iterations)?;
        let sessions = SessionStore::new(config.session_ttl());
        let staff = StaffService::new(
            store.clone(),
            hasher,
            RosterCache::new(config.roster_cache_path.clone()),
            sessions.clone(),
        );

        Ok(Self {
            inventory: InventoryService::new(ledger.clone(), config.cascade_delete_empty_items),
            transfers: Arc::new(TransferEngine::new(ledger, config.undo_window())),
            dashboard: DashboardService::new(store.clone(), config.alert_limit),
            logs: InventoryLogService::new(store.clone(), config.activity_window_days),
            reports: ReportService::new(store.clone()),
            staff,
            sessions,
            store,
            config: Arc::new(config),
        })
    }
}

/// Routes under `/api/v1`, each group behind its own permission.
pub fn api_v1_routes(sessions: &SessionStore) -> Router<AppState> {
    Router::new()
        .merge(handlers::auth::router(sessions))
        .merge(handlers::inventory::router(sessions))
        .merge(handlers::transfers::router(sessions))
        .merge(handlers::logs::router(sessions))
        .merge(handlers::dashboard::router(sessions))
        .merge(handlers::reports::router(sessions))
        .merge(handlers::staff::router(sessions))
}

/// Full application router without the outer HTTP layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .merge(handlers::health::router())
        .nest("/api/v1", api_v1_routes(&state.sessions))
        .with_state(state)
}
