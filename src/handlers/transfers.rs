use axum::{
    extract::{Extension, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::auth::{AuthRouterExt, Session, SessionStore};
use crate::errors::ServiceError;
use crate::models::Permission;
use crate::services::transfer::{BatchPlan, BatchRequest, TransferPlan, TransferRequest};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub plan: TransferPlan,
    /// Overrides the reason captured in the plan.
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn router(sessions: &SessionStore) -> Router<AppState> {
    Router::new()
        .route("/transfers/preview", post(preview))
        .route("/transfers", post(commit))
        .route("/transfers/batch/preview", post(preview_batch))
        .route("/transfers/batch", post(commit_batch))
        .route("/transfers/undo", post(undo).get(undo_status))
        .with_permission(sessions, Permission::Transfer)
}

async fn preview(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.transfers.propose_transfer(&request).await?))
}

async fn commit(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<CommitRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let reason = request.reason.as_deref().unwrap_or(&request.plan.reason);
    let committed = state
        .transfers
        .commit_transfer(&request.plan, reason, session.actor())
        .await?;
    Ok(Json(committed))
}

async fn preview_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.transfers.propose_batch(&request).await?))
}

async fn commit_batch(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(plan): Json<BatchPlan>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.transfers.commit_batch(&plan, session.actor()).await?))
}

async fn undo(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .transfers
        .undo_last_transfer(session.actor())
        .await?
        .ok_or_else(|| ServiceError::not_found("Nothing to undo"))?;
    Ok(Json(outcome))
}

async fn undo_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.transfers.undo_status().await)
}
