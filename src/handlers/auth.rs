use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{AuthRouterExt, Session, SessionStore};
use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub pin: String,
}

pub fn router(sessions: &SessionStore) -> Router<AppState> {
    let signed_in = Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
        .with_session(sessions);
    Router::new().route("/login", post(login)).merge(signed_in)
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state.staff.login(request.pin.trim()).await?;
    Ok((StatusCode::OK, Json(outcome)))
}

async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<impl IntoResponse, ServiceError> {
    state.staff.logout(&session.token);
    Ok(Json(json!({ "message": "Signed out" })))
}

async fn me(Extension(session): Extension<Session>) -> impl IntoResponse {
    Json(session)
}
