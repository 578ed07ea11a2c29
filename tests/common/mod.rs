#![allow(dead_code)]

use std::sync::Arc;

use aidstock::{
    config::AppConfig,
    models::Permission,
    store::{DocumentStore, InMemoryStore},
    AppState,
};
use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

pub const ADMIN_NAME: &str = "Admin";
pub const ADMIN_PIN: &str = "123456";

/// Application over an in-memory store, with a signed-in administrator.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    token: String,
    _cache_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let cache_dir = tempfile::tempdir().expect("temp dir for roster cache");
        let config = AppConfig {
            roster_cache_path: cache_dir.path().join("roster.json"),
            // Cheap hashing keeps PIN checks fast in tests.
            pin_hash_memory_kib: 64,
            pin_hash_iterations: 1,
            ..AppConfig::default()
        };

        let store = Arc::new(InMemoryStore::new());
        let state = AppState::new(config, store.clone() as Arc<dyn DocumentStore>)
            .expect("application state");
        state
            .staff
            .bootstrap_admin(ADMIN_NAME, ADMIN_PIN)
            .await
            .expect("bootstrap admin")
            .expect("roster starts empty");

        let router = aidstock::build_router(state.clone());
        let mut app = Self {
            router,
            state,
            store,
            token: String::new(),
            _cache_dir: cache_dir,
        };
        app.token = app.login(ADMIN_PIN).await;
        app
    }

    /// Bearer token of the bootstrap administrator.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for requests as the administrator.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Signs in with `pin` and returns the bearer token.
    pub async fn login(&self, pin: &str) -> String {
        let response = self
            .request(Method::POST, "/api/v1/login", Some(json!({ "pin": pin })), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK, "login with {pin} failed");
        let body = response_json(response).await;
        body["session"]["token"]
            .as_str()
            .expect("session token")
            .to_string()
    }

    /// Creates an active staff member through the admin API.
    pub async fn create_staff(&self, name: &str, pin: &str, permissions: &[Permission]) -> Value {
        let response = self
            .request_authenticated(
                Method::POST,
                "/api/v1/staff",
                Some(json!({ "name": name, "pin": pin, "permissions": permissions })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        response_json(response).await
    }

    /// Creates an item at one location and returns its id.
    pub async fn seed_item(&self, name: &str, location: &str, qty: i64, levels: Value) -> String {
        let response = self
            .request_authenticated(
                Method::POST,
                "/api/v1/inventory/items",
                Some(json!({
                    "displayName": name,
                    "location": location,
                    "qty": qty,
                    "levels": levels,
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        response_json(response).await["id"]
            .as_str()
            .expect("item id")
            .to_string()
    }

    /// Current item as returned by the API.
    pub async fn item(&self, id: &str) -> Value {
        let response = self
            .request_authenticated(Method::GET, &format!("/api/v1/inventory/{id}"), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        response_json(response).await
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Looks up one location row of an item view.
pub fn location<'a>(item: &'a Value, name: &str) -> &'a Value {
    item["locations"]
        .as_array()
        .and_then(|rows| rows.iter().find(|row| row["name"] == name))
        .unwrap_or_else(|| panic!("no location {name} in {item}"))
}
