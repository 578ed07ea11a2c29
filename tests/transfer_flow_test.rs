//! Transfer flow over HTTP: preview, commit, audit trail, undo, batches.

mod common;

use axum::http::{Method, StatusCode};
use common::{location, response_json, TestApp};
use serde_json::{json, Value};

/// Bandages at StationA 10 and StationB 2, both with par 8 / min 3 / max 20.
async fn seed_bandages(app: &TestApp) -> String {
    let id = app
        .seed_item("Bandages", "StationA", 10, json!({"par": 8, "min": 3, "max": 20}))
        .await;
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/inventory/{id}/increase"),
            Some(json!({"location": "StationB", "amount": 2})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .request_authenticated(
            Method::PUT,
            &format!("/api/v1/inventory/{id}/levels"),
            Some(json!({"scope": "location", "location": "StationB", "par": 8, "min": 3, "max": 20})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    id
}

async fn preview(app: &TestApp, id: &str, from: &str, to: &str, quantity: i64) -> (StatusCode, Value) {
    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/transfers/preview",
            Some(json!({
                "itemId": id,
                "from": from,
                "to": to,
                "quantity": quantity,
                "reason": "restock",
            })),
        )
        .await;
    let status = response.status();
    (status, response_json(response).await)
}

async fn transfer_logs(app: &TestApp) -> Vec<Value> {
    let response = app
        .request_authenticated(Method::GET, "/api/v1/logs?kind=transfer", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    response_json(response)
        .await
        .as_array()
        .cloned()
        .expect("log array")
}

#[tokio::test]
async fn bandages_transfer_commits_and_audits() {
    let app = TestApp::new().await;
    let id = seed_bandages(&app).await;

    let (status, plan) = preview(&app, &id, "StationA", "StationB", 5).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plan["from"]["after"], 5);
    assert_eq!(plan["to"]["after"], 7);
    assert_eq!(plan["from"]["statusAfter"], "low");
    assert_eq!(plan["to"]["statusAfter"], "low");

    let response = app
        .request_authenticated(Method::POST, "/api/v1/transfers", Some(json!({ "plan": plan })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let moved = response_json(response).await;
    assert_eq!(moved["beforeFrom"], 10);
    assert_eq!(moved["beforeTo"], 2);
    assert_eq!(moved["afterFrom"], 5);
    assert_eq!(moved["afterTo"], 7);

    let item = app.item(&id).await;
    assert_eq!(location(&item, "StationA")["qty"], 5);
    assert_eq!(location(&item, "StationA")["status"], "low");
    assert_eq!(location(&item, "StationB")["qty"], 7);
    assert_eq!(location(&item, "StationB")["status"], "low");
    assert_eq!(item["totalQty"], 12);

    let logs = transfer_logs(&app).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["type"], "transfer");
    assert_eq!(logs[0]["qty"], 5);
    assert_eq!(logs[0]["from"], "StationA");
    assert_eq!(logs[0]["to"], "StationB");
    assert_eq!(logs[0]["actor"], common::ADMIN_NAME);
    assert!(logs[0]["timestamp"].is_string());
}

#[tokio::test]
async fn insufficient_preview_writes_nothing() {
    let app = TestApp::new().await;
    let id = seed_bandages(&app).await;

    let (status, body) = preview(&app, &id, "StationB", "StationA", 5).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "insufficient_stock");
    assert_eq!(body["details"]["available"], 2);
    assert_eq!(body["details"]["shortfall"], 3);

    let (status, _) = preview(&app, &id, "StationA", "StationA", 1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let item = app.item(&id).await;
    assert_eq!(location(&item, "StationA")["qty"], 10);
    assert_eq!(location(&item, "StationB")["qty"], 2);
    assert!(transfer_logs(&app).await.is_empty());
}

#[tokio::test]
async fn stale_plan_is_rejected_on_commit() {
    let app = TestApp::new().await;
    let id = seed_bandages(&app).await;

    let (_, plan) = preview(&app, &id, "StationA", "StationB", 8).await;

    // Someone else uses stock while the transfer awaits confirmation.
    let response = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/inventory/{id}/decrease"),
            Some(json!({"location": "StationA", "amount": 6, "reason": "used on shift"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_authenticated(Method::POST, "/api/v1/transfers", Some(json!({ "plan": plan })))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(response_json(response).await["code"], "stale_stock");

    let item = app.item(&id).await;
    assert_eq!(location(&item, "StationA")["qty"], 4);
    assert_eq!(location(&item, "StationB")["qty"], 2);
}

#[tokio::test]
async fn undo_restores_quantities_once() {
    let app = TestApp::new().await;
    let id = seed_bandages(&app).await;

    let (_, plan) = preview(&app, &id, "StationA", "Ambulance", 4).await;
    assert_eq!(plan["createsDestination"], true);
    let response = app
        .request_authenticated(Method::POST, "/api/v1/transfers", Some(json!({ "plan": plan })))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request_authenticated(Method::GET, "/api/v1/transfers/undo", None)
        .await;
    let status = response_json(response).await;
    assert_eq!(status["available"], true);
    assert_eq!(status["items"], 1);

    let response = app
        .request_authenticated(Method::POST, "/api/v1/transfers/undo", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let undone = response_json(response).await;
    assert_eq!(undone["reverted"].as_array().map(Vec::len), Some(1));

    let item = app.item(&id).await;
    assert_eq!(location(&item, "StationA")["qty"], 10);
    let names: Vec<&str> = item["locations"]
        .as_array()
        .expect("locations")
        .iter()
        .filter_map(|row| row["name"].as_str())
        .collect();
    assert_eq!(names, ["StationA", "StationB"], "undo drops the destination it created");

    let logs = transfer_logs(&app).await;
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["type"], "transfer-undo");

    let response = app
        .request_authenticated(Method::POST, "/api/v1/transfers/undo", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_transfer_moves_every_line() {
    let app = TestApp::new().await;
    let bandages = seed_bandages(&app).await;
    let gauze = app
        .seed_item("Gauze", "StationA", 6, json!({"par": 4, "min": 2, "max": 12}))
        .await;

    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/transfers/batch/preview",
            Some(json!({
                "from": "StationA",
                "to": "StationB",
                "reason": "event setup",
                "lines": [
                    {"itemId": bandages, "quantity": 3},
                    {"itemId": gauze, "quantity": 2},
                ],
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let plan = response_json(response).await;
    assert_eq!(plan["totalQuantity"], 5);

    let response = app
        .request_authenticated(Method::POST, "/api/v1/transfers/batch", Some(plan))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = response_json(response).await;
    assert_eq!(outcome["moves"].as_array().map(Vec::len), Some(2));

    assert_eq!(location(&app.item(&bandages).await, "StationB")["qty"], 5);
    assert_eq!(location(&app.item(&gauze).await, "StationB")["qty"], 2);
    assert_eq!(transfer_logs(&app).await.len(), 2);
}
