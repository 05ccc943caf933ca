use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use memory_api_server::config::Settings;
use memory_api_server::database::InMemoryMessageStore;
use memory_api_server::services::memory::{ConversationMemory, MemoryOptions, NO_CONTEXT};
use memory_api_server::{build_router, AppState};

fn test_app() -> (Router, Arc<InMemoryMessageStore>) {
    let store = Arc::new(InMemoryMessageStore::new());
    let mut options = MemoryOptions::default();
    options.retry.base_delay = Duration::from_millis(1);

    let memory = Arc::new(ConversationMemory::new(store.clone(), None, options));
    let app = build_router(AppState::new(memory, Settings::default()));
    (app, store)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn save(app: &Router, session: &str, role: &str, content: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/api/memory/messages",
        Some(json!({ "session_id": session, "role": role, "content": content })),
    )
    .await
}

#[tokio::test]
async fn test_save_and_read_back() {
    let (app, _) = test_app();

    let (status, body) = save(&app, "s1", "user", "hi").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "inserted");
    assert!(body["message_id"].is_string());

    save(&app, "s1", "assistant", "hello").await;

    let (status, body) = send(&app, Method::GET, "/api/memory/sessions/s1/history?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["content"], "hello");

    let (status, body) = send(&app, Method::GET, "/api/memory/sessions/s1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["user_count"], 1);
    assert_eq!(body["assistant_count"], 1);
    assert_eq!(body["cache_available"], false);
}

#[tokio::test]
async fn test_duplicate_save_reports_existing_id() {
    let (app, store) = test_app();

    let (_, first) = save(&app, "s1", "user", "again").await;
    let (status, second) = save(&app, "s1", "user", "again").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "duplicate");
    assert_eq!(second["message_id"], first["message_id"]);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_context_endpoint() {
    let (app, _) = test_app();

    let (status, body) = send(&app, Method::GET, "/api/memory/sessions/empty/context", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["context"], NO_CONTEXT);

    save(&app, "s1", "user", "what is a borrow checker").await;
    let (_, body) = send(&app, Method::GET, "/api/memory/sessions/s1/context?max_chars=2000", None).await;
    let context = body["context"].as_str().unwrap();
    assert_eq!(body["session_id"], "s1");
    assert!(context.contains("USER: what is a borrow checker"));
    assert!(context.ends_with("[Total messages: 1]"));
}

#[tokio::test]
async fn test_search_endpoint() {
    let (app, _) = test_app();
    save(&app, "s1", "user", "tokio runtime question").await;
    save(&app, "s1", "assistant", "unrelated answer").await;

    let (status, body) = send(&app, Method::GET, "/api/memory/sessions/s1/search?q=tokio", None).await;
    assert_eq!(status, StatusCode::OK);
    let results = body.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["content"], "tokio runtime question");
}

#[tokio::test]
async fn test_clear_session_endpoint() {
    let (app, store) = test_app();
    save(&app, "s1", "user", "one").await;
    save(&app, "s1", "assistant", "two").await;

    let (status, body) = send(&app, Method::DELETE, "/api/memory/sessions/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 2);
    assert!(store.is_empty());

    let (_, body) = send(&app, Method::GET, "/api/memory/sessions/s1/history", None).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let (app, _) = test_app();

    let (status, body) = save(&app, "", "user", "x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");

    let (status, _) = save(&app, "s1", "system", "x").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, Method::GET, "/api/memory/sessions/s1/history?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::POST, "/api/memory/maintenance/cleanup?days=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cleanup_endpoint() {
    let (app, _) = test_app();
    save(&app, "s1", "user", "recent").await;

    let (status, body) = send(&app, Method::POST, "/api/memory/maintenance/cleanup?days=30", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["days"], 30);
    assert_eq!(body["deleted"], 0);
}

#[tokio::test]
async fn test_health_and_readiness() {
    let (app, store) = test_app();

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["store_connected"], true);
    assert_eq!(body["cache_connected"], false);
    assert_eq!(body["context_strategy"], "buffer");

    let (status, _) = send(&app, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);

    store.set_offline(true);
    let (status, _) = send(&app, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, body) = save(&app, "s1", "user", "lost").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "unavailable");
}

#[tokio::test]
async fn test_prompt_and_summary_endpoints() {
    let (app, _) = test_app();

    let (status, body) = send(&app, Method::GET, "/api/memory/sessions/s1/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], "No conversation summary available.");

    save(&app, "s1", "user", "hi").await;
    save(&app, "s1", "assistant", "hello").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/memory/sessions/s1/prompt",
        Some(json!({ "message": "how are you?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "s1");
    assert_eq!(
        body["prompt"],
        "Previous conversation:\nUser: hi\nAssistant: hello\n\nUser: how are you?\nAssistant:"
    );

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/memory/sessions/s1/prompt",
        Some(json!({ "message": "x", "limit": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, Method::GET, "/api/memory/sessions/s1/summary", None).await;
    assert!(body["summary"].as_str().unwrap().contains("USER: hi"));
}
