#![cfg(feature = "server")]
//! HTTP routes driven through the router without binding a socket.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{seeded_registry, text, tool_call, Round, ScriptedProvider};
use dispensary::agent_loop::AgentLoop;
use dispensary::dispatch::Dispatcher;
use dispensary::server::{router, AppState};
use dispensary::types::Role;

fn app(provider: Arc<ScriptedProvider>) -> Router {
    let (registry, store) = seeded_registry();
    let dispatcher = Dispatcher::new(AgentLoop::new(provider, registry), 10);
    router(AppState::new(dispatcher, store), None)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat/stream")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Payloads of the `data:` frames in an SSE body.
fn frames(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter(|f| !f.is_empty())
        .map(|f| {
            let data = f.strip_prefix("data: ").expect("frame starts with data:");
            serde_json::from_str(data).unwrap()
        })
        .collect()
}

#[tokio::test]
async fn health_is_ok() {
    let app = app(Arc::new(ScriptedProvider::new(vec![])));

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn chat_stream_emits_sse_frames() {
    let mut round0 = tool_call(
        0,
        Some("call_1"),
        "check_stock_availability",
        r#"{"med_id":"MED001","store_id":"STORE_TLV_01"}"#,
    );
    round0.insert(0, text("Checking. "));
    let provider = Arc::new(ScriptedProvider::new(vec![
        Round::Stream(round0),
        Round::Stream(vec![text("42 in stock.")]),
    ]));
    let app = app(provider.clone());

    let response = app
        .oneshot(chat_request(json!({
            "messages": [
                { "role": "user", "content": "Hi" },
                { "role": "assistant", "content": "Hello, how can I help?" },
                { "role": "user", "content": "Is Nurofen in stock at Dizengoff?" }
            ]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let frames = frames(&body_text(response).await);
    let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
    assert_eq!(
        types,
        vec![
            "text_delta",
            "tool_args_delta",
            "tool_args_delta",
            "tool_call",
            "tool_result",
            "text_delta",
            "done"
        ]
    );
    assert_eq!(frames[0], json!({ "type": "text_delta", "delta": "Checking. " }));
    assert_eq!(frames[3]["call_id"], "call_1");
    assert_eq!(frames[3]["arguments"]["med_id"], "MED001");
    assert_eq!(frames[4]["result"]["quantity"], 42);
    assert_eq!(frames[6], json!({ "type": "done" }));

    let first_round = &provider.seen()[0];
    let roles: Vec<Role> = first_round.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
}

#[tokio::test]
async fn chat_stream_failure_is_an_error_frame() {
    let provider = Arc::new(ScriptedProvider::new(vec![Round::FailToOpen("boom".into())]));
    let app = app(provider);

    let response = app
        .oneshot(chat_request(json!({
            "messages": [{ "role": "user", "content": "hi" }]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let frames = frames(&body_text(response).await);
    assert_eq!(
        frames,
        vec![json!({ "type": "error", "error": { "message": "Provider error: scripted: boom" } })]
    );
}

#[tokio::test]
async fn malformed_chat_body_is_rejected() {
    let app = app(Arc::new(ScriptedProvider::new(vec![])));

    let response = app
        .oneshot(
            Request::post("/api/chat/stream")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn tool_stats_reflect_chat_activity() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Round::Stream(tool_call(0, Some("c1"), "list_stores", "{}")),
        Round::Stream(vec![text("Four stores.")]),
    ]));
    let app = app(provider);

    let response = app
        .clone()
        .oneshot(chat_request(json!({
            "messages": [{ "role": "user", "content": "Which stores do you have?" }]
        })))
        .await
        .unwrap();
    // Drain the stream so the tool actually runs.
    body_text(response).await;

    let response = app
        .oneshot(Request::get("/api/tools/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(
        body,
        json!({ "tools": [{ "tool_name": "list_stores", "call_count": 1 }] })
    );
}

#[tokio::test]
async fn frontend_directory_is_served() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>Pharmacy</h1>").unwrap();
    std::fs::write(dir.path().join("app.js"), "console.log('hi');").unwrap();

    let (registry, store) = seeded_registry();
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let dispatcher = Dispatcher::new(AgentLoop::new(provider, registry), 10);
    let app = router(AppState::new(dispatcher, store), Some(dir.path()));

    let index = app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(index.status(), StatusCode::OK);
    assert_eq!(body_text(index).await, "<h1>Pharmacy</h1>");

    let script = app
        .oneshot(Request::get("/static/app.js").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(script.status(), StatusCode::OK);
    assert_eq!(body_text(script).await, "console.log('hi');");
}
