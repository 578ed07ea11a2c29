use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use crate::auth::{AuthRouterExt, Session, SessionStore};
use crate::errors::ServiceError;
use crate::models::{Permission, StockLevels};
use crate::services::inventory::{AddStockRequest, ItemFilter, LevelScope, NewItem};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IncreaseRequest {
    #[validate(length(min = 1, message = "Location cannot be empty"))]
    pub location: String,
    #[validate(range(min = 1, message = "Amount must be at least 1"))]
    pub amount: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DecreaseRequest {
    #[validate(length(min = 1, message = "Location cannot be empty"))]
    pub location: String,
    #[validate(range(min = 1, message = "Amount must be at least 1"))]
    pub amount: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeKind {
    Location,
    AllLocations,
    DefaultsOnly,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelsRequest {
    pub par: Option<i64>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub scope: ScopeKind,
    #[serde(default)]
    pub location: Option<String>,
}

impl LevelsRequest {
    fn levels(&self) -> StockLevels {
        StockLevels {
            par: self.par,
            min: self.min,
            max: self.max,
        }
    }

    fn scope(&self) -> Result<LevelScope, ServiceError> {
        match self.scope {
            ScopeKind::Location => self
                .location
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| LevelScope::Location(l.to_string()))
                .ok_or_else(|| ServiceError::validation("A location is required for this scope")),
            ScopeKind::AllLocations => Ok(LevelScope::AllLocations),
            ScopeKind::DefaultsOnly => Ok(LevelScope::DefaultsOnly),
        }
    }
}

/// Read and adjust existing stock.
pub fn router(sessions: &SessionStore) -> Router<AppState> {
    let inventory = Router::new()
        .route("/inventory", get(list_items))
        .route("/inventory/locations", get(list_locations))
        .route("/inventory/:id", get(get_item).delete(delete_item))
        .route("/inventory/:id/levels", put(update_levels))
        .route("/inventory/:id/decrease", post(decrease_stock))
        .route("/inventory/:id/locations/:location", delete(delete_location))
        .with_permission(sessions, Permission::Inventory);

    let add_stock = Router::new()
        .route("/inventory/items", post(create_item))
        .route("/inventory/add-stock", post(add_stock))
        .route("/inventory/:id/increase", post(increase_stock))
        .with_permission(sessions, Permission::AddStock);

    inventory.merge(add_stock)
}

async fn list_items(
    State(state): State<AppState>,
    Query(filter): Query<ItemFilter>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.inventory.list_items(&filter).await?))
}

async fn list_locations(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.inventory.list_locations().await?))
}

async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.inventory.get_item(&id).await?))
}

async fn create_item(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<NewItem>,
) -> Result<impl IntoResponse, ServiceError> {
    let item = state.inventory.create_item(&request, session.actor()).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn add_stock(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<AddStockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    Ok(Json(state.inventory.add_stock(&request, session.actor()).await?))
}

async fn increase_stock(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(request): Json<IncreaseRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;
    let change = state
        .inventory
        .increase_stock(&id, request.location.trim(), request.amount, session.actor())
        .await?;
    Ok(Json(change))
}

async fn decrease_stock(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(request): Json<DecreaseRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;
    let change = state
        .inventory
        .decrease_stock(
            &id,
            request.location.trim(),
            request.amount,
            &request.reason,
            session.actor(),
        )
        .await?;
    Ok(Json(change))
}

async fn update_levels(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(request): Json<LevelsRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let scope = request.scope()?;
    let outcome = state
        .inventory
        .update_levels(&id, request.levels(), &scope, session.actor())
        .await?;
    Ok(Json(outcome))
}

async fn delete_location(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path((id, location)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .inventory
        .delete_location(&id, &location, session.actor())
        .await?;
    Ok(Json(outcome))
}

async fn delete_item(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    state.inventory.delete_item(&id, session.actor()).await?;
    Ok(StatusCode::NO_CONTENT)
}
