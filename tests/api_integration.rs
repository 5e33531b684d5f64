//! HTTP surface tests for the session API.
//!
//! These drive the full router (middleware included) through `axum-test`
//! against an in-memory store.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use topicboard::AppState;
use topicboard::config::{
    AppConfig, LoggingConfig, ResilienceConfig, ServerConfig, StoreConfig, UpdatesConfig,
};
use topicboard::server::router;
use topicboard::session::{MemoryBackend, SessionStore};

// =============================================================================
// Test Utilities
// =============================================================================

fn test_config(rate_limit_enabled: bool) -> Arc<AppConfig> {
    Arc::new(AppConfig {
        server: ServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
        },
        store: StoreConfig {
            provider: "memory".to_string(),
            data_dir: String::new(),
            reset_on_start: true,
            lock_timeout_ms: 1000,
        },
        updates: UpdatesConfig { capacity: 64 },
        resilience: ResilienceConfig {
            rate_limit_enabled,
            requests_per_second: 0.1,
            burst_size: 2.0,
            timeout_disabled: false,
            request_timeout_secs: 30,
        },
        logging: LoggingConfig { json: false },
    })
}

fn setup_with(config: Arc<AppConfig>) -> TestServer {
    let sessions = SessionStore::with_options(Arc::new(MemoryBackend), &config.store_options());
    let state = AppState::new(config, sessions);
    TestServer::new(router(state)).expect("Failed to start test server")
}

fn setup() -> TestServer {
    setup_with(test_config(false))
}

async fn create_session(server: &TestServer, name: &str) -> String {
    let response = server
        .post("/api/sessions")
        .json(&json!({ "name": name }))
        .await;
    response.assert_status_ok();
    response.json::<Value>()["sessionId"]
        .as_str()
        .expect("sessionId missing")
        .to_string()
}

fn assert_error(response: &axum_test::TestResponse, status: StatusCode, kind: &str) {
    response.assert_status(status);
    let body = response.json::<Value>();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], kind);
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn test_create_session_and_poll_empty_snapshot() {
    let server = setup();

    let id = create_session(&server, "My   Cool Session").await;
    assert_eq!(id, "My-Cool-Session");

    let api = server.get("/api/sessions/My-Cool-Session/topics").await;
    api.assert_status_ok();
    assert_eq!(api.text(), r#"{"topics":{}}"#);

    let polled = server.get("/sessions/My-Cool-Session/topics.json").await;
    polled.assert_status_ok();
    assert_eq!(polled.text(), api.text());

    let list = server.get("/api/sessions").await;
    assert_eq!(list.json::<Value>(), json!({ "sessions": ["My-Cool-Session"] }));
}

#[tokio::test]
async fn test_create_session_validation() {
    let server = setup();

    let empty = server.post("/api/sessions").json(&json!({ "name": "  " })).await;
    assert_error(&empty, StatusCode::BAD_REQUEST, "invalid_argument");

    let missing = server.post("/api/sessions").json(&json!({})).await;
    assert_error(&missing, StatusCode::BAD_REQUEST, "invalid_argument");

    let malformed = server
        .post("/api/sessions")
        .text("{ not json")
        .content_type("application/json")
        .await;
    assert_error(&malformed, StatusCode::BAD_REQUEST, "invalid_argument");

    create_session(&server, "standup").await;
    let duplicate = server
        .post("/api/sessions")
        .json(&json!({ "name": "standup" }))
        .await;
    assert_error(&duplicate, StatusCode::CONFLICT, "already_exists");
}

#[tokio::test]
async fn test_unknown_session_is_404_everywhere() {
    let server = setup();

    let snapshot = server.get("/api/sessions/ghost/topics").await;
    assert_error(&snapshot, StatusCode::NOT_FOUND, "not_found");

    let topic = server
        .post("/api/topics")
        .json(&json!({ "sessionId": "ghost", "topicName": "t" }))
        .await;
    assert_error(&topic, StatusCode::NOT_FOUND, "not_found");

    let input = server
        .post("/api/inputs")
        .json(&json!({ "sessionId": "ghost", "topicName": "t", "text": "hi" }))
        .await;
    assert_error(&input, StatusCode::NOT_FOUND, "not_found");

    let merge = server
        .post("/api/merge")
        .json(&json!({ "sessionId": "ghost", "partialTopicTree": { "t": ["x"] } }))
        .await;
    assert_error(&merge, StatusCode::NOT_FOUND, "not_found");

    let end = server
        .post("/api/topics/end")
        .json(&json!({ "sessionId": "ghost", "topicName": "t" }))
        .await;
    assert_error(&end, StatusCode::NOT_FOUND, "not_found");
}

// =============================================================================
// Topics and inputs
// =============================================================================

#[tokio::test]
async fn test_topic_and_input_flow() {
    let server = setup();
    let id = create_session(&server, "workshop").await;

    let topic = server
        .post("/api/topics")
        .json(&json!({ "sessionId": id, "topicName": "Ideas" }))
        .await;
    topic.assert_status_ok();
    assert_eq!(
        topic.json::<Value>(),
        json!({ "success": true, "topicName": "Ideas" })
    );

    let first = server
        .post("/api/inputs")
        .json(&json!({ "sessionId": id, "topicName": "Ideas", "text": "more coffee" }))
        .await;
    first.assert_status_ok();
    assert_eq!(first.json::<Value>()["totalInputs"], 1);

    let second = server
        .post("/api/inputs")
        .json(&json!({
            "sessionId": id,
            "topicName": "Ideas",
            "subtopicName": "Office",
            "text": "standing desks"
        }))
        .await;
    assert_eq!(second.json::<Value>()["totalInputs"], 2);

    let snapshot = server.get(&format!("/api/sessions/{id}/topics")).await;
    assert_eq!(
        snapshot.json::<Value>(),
        json!({
            "topics": {
                "Ideas": {
                    "General": ["more coffee"],
                    "Office": ["standing desks"]
                }
            }
        })
    );
}

#[tokio::test]
async fn test_missing_fields_rejected_without_changes() {
    let server = setup();
    let id = create_session(&server, "s").await;

    let no_topic = server
        .post("/api/topics")
        .json(&json!({ "sessionId": id }))
        .await;
    assert_error(&no_topic, StatusCode::BAD_REQUEST, "invalid_argument");

    let empty_topic = server
        .post("/api/topics")
        .json(&json!({ "sessionId": id, "topicName": "" }))
        .await;
    assert_error(&empty_topic, StatusCode::BAD_REQUEST, "invalid_argument");

    let empty_text = server
        .post("/api/inputs")
        .json(&json!({ "sessionId": id, "topicName": "t", "subtopicName": "x", "text": "" }))
        .await;
    assert_error(&empty_text, StatusCode::BAD_REQUEST, "invalid_argument");

    let snapshot = server.get(&format!("/api/sessions/{id}/topics")).await;
    assert_eq!(snapshot.text(), r#"{"topics":{}}"#);
}

#[tokio::test]
async fn test_duplicate_topic_conflicts() {
    let server = setup();
    let id = create_session(&server, "s").await;
    let body = json!({ "sessionId": id, "topicName": "t" });

    server.post("/api/topics").json(&body).await.assert_status_ok();
    let again = server.post("/api/topics").json(&body).await;
    assert_error(&again, StatusCode::CONFLICT, "already_exists");
}

#[tokio::test]
async fn test_concurrent_inputs_all_land() {
    let server = setup();
    let id = create_session(&server, "busy").await;

    let server_ref = &server;
    let requests = (0..50).map(|i| {
        let id = id.clone();
        async move {
            server_ref
                .post("/api/inputs")
                .json(&json!({ "sessionId": id, "topicName": "Q", "text": format!("q{i}") }))
                .await
        }
    });
    for response in futures::future::join_all(requests).await {
        response.assert_status_ok();
    }

    let snapshot = server.get(&format!("/api/sessions/{id}/topics")).await;
    let inputs = snapshot.json::<Value>()["topics"]["Q"]["General"]
        .as_array()
        .unwrap()
        .len();
    assert_eq!(inputs, 50);
}

#[tokio::test]
async fn test_end_topic_flow() {
    let server = setup();
    let id = create_session(&server, "s").await;
    let topic = json!({ "sessionId": id, "topicName": "Votes" });

    server.post("/api/topics").json(&topic).await.assert_status_ok();
    let ended = server.post("/api/topics/end").json(&topic).await;
    ended.assert_status_ok();
    assert_eq!(ended.json::<Value>()["topicName"], "Votes");

    let again = server.post("/api/topics/end").json(&topic).await;
    assert_error(&again, StatusCode::CONFLICT, "already_exists");

    let late = server
        .post("/api/inputs")
        .json(&json!({ "sessionId": id, "topicName": "Votes", "text": "late" }))
        .await;
    assert_error(&late, StatusCode::CONFLICT, "topic_closed");

    let unknown = server
        .post("/api/topics/end")
        .json(&json!({ "sessionId": id, "topicName": "Nope" }))
        .await;
    assert_error(&unknown, StatusCode::NOT_FOUND, "not_found");

    let snapshot = server.get(&format!("/api/sessions/{id}/topics")).await;
    assert_eq!(snapshot.json::<Value>()["finished"], json!(["Votes"]));
}

// =============================================================================
// Merge updates
// =============================================================================

#[tokio::test]
async fn test_merge_replaces_only_named_topics() {
    let server = setup();
    let id = create_session(&server, "s").await;

    for (topic, text) in [("A", "raw a"), ("B", "raw b")] {
        server
            .post("/api/inputs")
            .json(&json!({ "sessionId": id, "topicName": topic, "text": text }))
            .await
            .assert_status_ok();
    }

    let merge = server
        .post("/api/merge")
        .json(&json!({
            "sessionId": id,
            "partialTopicTree": {
                "A": { "Food": ["pizza", "tacos"] },
                "C": ["flat one"]
            }
        }))
        .await;
    merge.assert_status_ok();
    assert_eq!(merge.json::<Value>(), json!({ "success": true }));

    let snapshot = server.get(&format!("/api/sessions/{id}/topics")).await;
    assert_eq!(
        snapshot.json::<Value>(),
        json!({
            "topics": {
                "A": { "Food": ["pizza", "tacos"] },
                "B": { "General": ["raw b"] },
                "C": { "General": ["flat one"] }
            }
        })
    );
}

#[tokio::test]
async fn test_merge_validation() {
    let server = setup();
    let id = create_session(&server, "s").await;

    let missing = server
        .post("/api/merge")
        .json(&json!({ "sessionId": id }))
        .await;
    assert_error(&missing, StatusCode::BAD_REQUEST, "invalid_argument");

    let wrong_shape = server
        .post("/api/merge")
        .json(&json!({ "sessionId": id, "partialTopicTree": { "A": 42 } }))
        .await;
    assert_error(&wrong_shape, StatusCode::BAD_REQUEST, "invalid_argument");
}

// =============================================================================
// Updates feed, health and resilience
// =============================================================================

#[tokio::test]
async fn test_updates_feed_since_cursor() {
    let server = setup();
    let id = create_session(&server, "s").await;
    server
        .post("/api/inputs")
        .json(&json!({ "sessionId": id, "topicName": "t", "text": "x" }))
        .await
        .assert_status_ok();

    let all = server.get("/api/updates").await.json::<Value>();
    assert_eq!(all["count"], 2);
    assert_eq!(all["latest"], 2);
    assert_eq!(all["updates"][0]["kind"], "session_created");
    assert_eq!(all["updates"][1]["kind"], "input_appended");
    assert_eq!(all["updates"][1]["sessionId"], "s");
    assert_eq!(all["updates"][1]["topics"], json!(["t"]));

    let newer = server
        .get("/api/updates")
        .add_query_param("since", 1)
        .await
        .json::<Value>();
    assert_eq!(newer["count"], 1);
    assert_eq!(newer["updates"][0]["seq"], 2);
}

#[tokio::test]
async fn test_health() {
    let server = setup();
    create_session(&server, "one").await;

    let health = server.get("/health").await;
    health.assert_status_ok();
    assert_eq!(health.json::<Value>(), json!({ "status": "ok", "sessions": 1 }));
}

#[tokio::test]
async fn test_rate_limit_rejects_bursts() {
    let server = setup_with(test_config(true));

    server.get("/health").await.assert_status_ok();
    server.get("/health").await.assert_status_ok();
    let limited = server.get("/health").await;
    assert_error(&limited, StatusCode::TOO_MANY_REQUESTS, "rate_limited");
}
