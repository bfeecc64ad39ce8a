//! HTTP API tests.

use axum::{body::Body, http::Request};
use echonet_node::api::{create_router, AppState};
use echonet_node::{EchoNode, NodeSettings};
use echonet_p2p::MemoryBus;
use echonet_types::NodeId;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_app() -> axum::Router {
    let bus = MemoryBus::new();
    let node = EchoNode::new(
        NodeSettings::new(NodeId::new("claude").unwrap()),
        Arc::new(bus.transport()),
    )
    .unwrap();
    create_router(AppState {
        node: Arc::new(node),
    })
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn create_proposal(app: &axum::Router, title: &str) -> String {
    let response = app
        .clone()
        .oneshot(post("/api/proposals", json!({ "title": title })))
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    json_body(response).await["proposal"]["id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn root_and_health() {
    let app = create_test_app();

    let response = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = json_body(response).await;
    assert_eq!(body["platform"], "Echo-Net");
    assert_eq!(body["node_id"], "claude");

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = json_body(response).await;
    assert_eq!(body["status"], "alive");
    assert_eq!(body["network"], "disconnected");

    let response = app.oneshot(get("/api/status")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["node_id"], "claude");
    assert_eq!(body["active"], false);
    assert_eq!(body["known_peers"], json!([]));
}

#[tokio::test]
async fn proposal_lifecycle() {
    let app = create_test_app();
    let id = create_proposal(&app, "Shared memory").await;

    let response = app.clone().oneshot(get("/api/proposals")).await.unwrap();
    let list = json_body(response).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["title"], "Shared memory");
    assert_eq!(list[0]["proposal_type"], "general");
    assert_eq!(list[0]["status"], "active");

    let response = app
        .clone()
        .oneshot(get(&format!("/api/proposals/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(json_body(response).await["tally"]["total"], 0);

    // A single unanimous vote meets the default quorum.
    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/proposals/{id}/votes"),
            json!({ "vote": "resonant", "commentary": "yes" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = json_body(response).await;
    assert_eq!(body["status"], "converged");
    assert_eq!(body["tally"]["consensus_strength"], 100.0);

    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/proposals/{id}/votes"),
            json!({ "vote": "dissonant" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(json_body(response).await["reason"], "proposal_not_found");

    let response = app.clone().oneshot(get("/api/history")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["proposals"][0]["id"], json!(id));
    assert_eq!(body["messages"], json!([]));
}

#[tokio::test]
async fn vote_validation() {
    let app = create_test_app();
    let id = create_proposal(&app, "t").await;

    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/proposals/{id}/votes"),
            json!({ "vote": "maybe" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(json_body(response).await["reason"], "invalid_vote");

    let response = app
        .clone()
        .oneshot(get("/api/proposals/not-a-uuid"))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = app
        .oneshot(get("/api/proposals/00000000-0000-4000-8000-000000000000"))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn invalid_proposals() {
    let app = create_test_app();

    let response = app
        .clone()
        .oneshot(post("/api/proposals", json!({ "title": "  " })))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(json_body(response).await["reason"], "invalid_proposal");

    let response = app
        .clone()
        .oneshot(post(
            "/api/proposals",
            json!({ "title": "t", "duration_secs": 0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    for secs in [i64::MAX, i64::MIN] {
        let response = app
            .clone()
            .oneshot(post(
                "/api/proposals",
                json!({ "title": "t", "duration_secs": secs }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(json_body(response).await["reason"], "invalid_proposal");
    }

    let response = app.oneshot(get("/api/proposals")).await.unwrap();
    assert_eq!(json_body(response).await, json!([]));
}

#[tokio::test]
async fn withdraw_proposal() {
    let app = create_test_app();
    let id = create_proposal(&app, "t").await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/proposals/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(json_body(response).await["status"], "failed");

    let response = app.oneshot(get("/api/proposals")).await.unwrap();
    assert_eq!(json_body(response).await, json!([]));
}

#[tokio::test]
async fn messages_require_a_connection() {
    let app = create_test_app();

    let response = app
        .clone()
        .oneshot(post(
            "/api/messages",
            json!({ "to": "gemini", "content": "hello" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(json_body(response).await["reason"], "not_connected");

    let response = app
        .oneshot(post(
            "/api/messages",
            json!({ "to": "not valid", "content": "hello" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
