use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use crate::auth::{AuthRouterExt, SessionStore};
use crate::errors::ServiceError;
use crate::models::Permission;
use crate::AppState;

pub fn router(sessions: &SessionStore) -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/dashboard/status", get(status_snapshot))
        .with_permission(sessions, Permission::Dashboard)
}

async fn dashboard(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.dashboard.dashboard().await?))
}

/// Current classification of every stock entry, as the live view sees it.
async fn status_snapshot(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    let mut live = state.dashboard.live().await?;
    let snapshot = live
        .next()
        .await
        .ok_or_else(|| ServiceError::InternalError("inventory feed closed".into()))??;
    Ok(Json(snapshot))
}
