use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::auth::{AuthRouterExt, SessionStore};
use crate::errors::ServiceError;
use crate::models::Permission;
use crate::services::staff::{NewStaff, StaffUpdate};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ToggleRequest {
    /// Required when the toggle reactivates the member.
    pub pin: Option<String>,
}

pub fn router(sessions: &SessionStore) -> Router<AppState> {
    Router::new()
        .route("/staff", get(list_staff).post(create_staff))
        .route(
            "/staff/:id",
            get(get_staff).put(update_staff).delete(delete_staff),
        )
        .route("/staff/:id/toggle", post(toggle_staff))
        .with_permission(sessions, Permission::AdminPage)
}

async fn list_staff(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.staff.list().await?))
}

async fn create_staff(
    State(state): State<AppState>,
    Json(request): Json<NewStaff>,
) -> Result<impl IntoResponse, ServiceError> {
    let staff = state.staff.create(&request).await?;
    Ok((StatusCode::CREATED, Json(staff)))
}

async fn get_staff(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.staff.get(&id).await?))
}

async fn update_staff(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StaffUpdate>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.staff.update(&id, &request).await?))
}

async fn toggle_staff(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<ToggleRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let Json(request) = request.unwrap_or_default();
    Ok(Json(
        state
            .staff
            .toggle_active(&id, request.pin.as_deref())
            .await?,
    ))
}

async fn delete_staff(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    state.staff.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
