use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use crate::auth::{AuthRouterExt, SessionStore};
use crate::errors::ServiceError;
use crate::models::Permission;
use crate::services::inventory_logs::LogFilter;
use crate::AppState;

pub fn router(sessions: &SessionStore) -> Router<AppState> {
    Router::new()
        .route("/logs", get(list_logs))
        .route("/logs/summary", get(activity_summary))
        .route("/logs/filters", get(filter_options))
        .with_permission(sessions, Permission::Inventory)
}

async fn list_logs(
    State(state): State<AppState>,
    Query(filter): Query<LogFilter>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.logs.list(&filter).await?))
}

async fn activity_summary(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.logs.activity_summary(Utc::now()).await?))
}

async fn filter_options(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.logs.filter_options().await?))
}
