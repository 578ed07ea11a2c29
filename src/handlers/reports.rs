use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::auth::{AuthRouterExt, SessionStore};
use crate::errors::ServiceError;
use crate::models::{InjuryReportInput, Permission};
use crate::services::reports::ReportFilter;
use crate::AppState;

pub fn router(sessions: &SessionStore) -> Router<AppState> {
    Router::new()
        .route("/reports", get(list_reports).post(create_report))
        .route("/reports/summary", get(summary))
        .route(
            "/reports/:id",
            get(get_report).put(update_report).delete(delete_report),
        )
        .with_permission(sessions, Permission::Reports)
}

async fn list_reports(
    State(state): State<AppState>,
    Query(filter): Query<ReportFilter>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.reports.list(&filter).await?))
}

async fn create_report(
    State(state): State<AppState>,
    Json(input): Json<InjuryReportInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let report = state.reports.create(input).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn summary(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.reports.summary().await?))
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.reports.get(&id).await?))
}

async fn update_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<InjuryReportInput>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.reports.update(&id, input).await?))
}

async fn delete_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    state.reports.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
