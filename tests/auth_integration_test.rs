//! Sign-in, sessions and per-route permissions.
//!
//! Tests cover:
//! - Missing and unknown bearer tokens
//! - PIN format and wrong-PIN rejection
//! - Permission-gated route groups
//! - Session revocation on logout and deactivation
//! - Offline sign-in against the roster cache

mod common;

use aidstock::models::Permission;
use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn protected_routes_require_a_session() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/inventory", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/api/v1/inventory", None, Some("not-a-session"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(response).await["code"], "unauthorized");

    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_rejects_bad_pins() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::POST, "/api/v1/login", Some(json!({"pin": "12ab"})), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(Method::POST, "/api/v1/login", Some(json!({"pin": "000000"})), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn permissions_gate_route_groups() {
    let app = TestApp::new().await;
    app.create_staff("Sam", "222222", &[Permission::Inventory, Permission::Dashboard])
        .await;
    let token = app.login("222222").await;

    let response = app
        .request(Method::GET, "/api/v1/me", None, Some(&token))
        .await;
    let me = response_json(response).await;
    assert_eq!(me["name"], "Sam");
    assert_eq!(me["offline"], false);

    for (method, uri, body) in [
        (Method::GET, "/api/v1/inventory", None),
        (Method::GET, "/api/v1/dashboard", None),
        (Method::GET, "/api/v1/logs", None),
    ] {
        let response = app.request(method, uri, body, Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }

    for (method, uri, body) in [
        (
            Method::POST,
            "/api/v1/transfers/preview",
            Some(json!({"itemId": "x", "from": "A", "to": "B", "quantity": 1})),
        ),
        (
            Method::POST,
            "/api/v1/inventory/items",
            Some(json!({"displayName": "Gauze", "location": "A", "qty": 1})),
        ),
        (Method::GET, "/api/v1/reports", None),
        (Method::GET, "/api/v1/staff", None),
    ] {
        let response = app.request(method, uri, body, Some(&token)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
    }
}

#[tokio::test]
async fn duplicate_active_pin_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/staff",
            Some(json!({"name": "Copycat", "pin": common::ADMIN_PIN, "permissions": []})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logout_and_deactivation_end_sessions() {
    let app = TestApp::new().await;
    let staff = app
        .create_staff("Robin", "333333", &[Permission::Inventory])
        .await;
    let id = staff["id"].as_str().expect("staff id");

    let token = app.login("333333").await;
    let response = app
        .request(Method::POST, "/api/v1/logout", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .request(Method::GET, "/api/v1/inventory", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = app.login("333333").await;
    let response = app
        .request_authenticated(Method::POST, &format!("/api/v1/staff/{id}/toggle"), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["active"], false);

    let response = app
        .request(Method::GET, "/api/v1/inventory", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::POST, "/api/v1/login", Some(json!({"pin": "333333"})), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "inactive staff cannot sign in");

    let response = app
        .request_authenticated(Method::POST, &format!("/api/v1/staff/{id}/toggle"), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST, "reactivation needs a new PIN");

    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/staff/{id}/toggle"),
            Some(json!({"pin": "343434"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["active"], true);
    app.login("343434").await;
}

#[tokio::test]
async fn offline_login_uses_roster_cache() {
    let app = TestApp::new().await;
    app.create_staff("Alex", "444444", &[Permission::Inventory])
        .await;
    // Any successful sign-in refreshes the cache.
    app.login("444444").await;

    app.store.set_offline(true);
    let response = app
        .request(Method::POST, "/api/v1/login", Some(json!({"pin": "444444"})), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = response_json(response).await;
    assert_eq!(outcome["session"]["offline"], true);
    assert_eq!(outcome["staff"]["name"], "Alex");

    // Reads still need the store.
    let token = outcome["session"]["token"].as_str().expect("token");
    let response = app
        .request(Method::GET, "/api/v1/inventory", None, Some(token))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    std::fs::remove_file(&app.state.config.roster_cache_path).expect("remove roster cache");
    let response = app
        .request(Method::POST, "/api/v1/login", Some(json!({"pin": "444444"})), None)
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response_json(response).await["code"], "offline_unavailable");
}
