//! Integration tests for the GUI-facing API against an in-process server
//!
//! Run with: cargo test --test gui_api

use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use mars_app::{LaunchEnv, MarsApi, SettingsStore, StreamEnd};
use mars_daemon::test_utils::{unused_port, MockServer};
use mars_daemon::{ServerSupervisor, SupervisorOptions};
use mars_core::ServerConfig;

fn api_for(config: ServerConfig, temp: &TempDir) -> MarsApi {
    let supervisor = ServerSupervisor::new(config, LaunchEnv::default(), SupervisorOptions::default());
    MarsApi::with_supervisor(
        supervisor,
        SettingsStore::new(temp.path().join("Mars").join("settings.json")),
    )
}

// ─────────────────────────────────────────────────────────
// Sessions and messages
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_round_trip_uses_current_session() {
    let server = MockServer::start().await;
    server.respond("POST", "/session", 200, r#"{"id":"ses a/1"}"#);
    server.respond("POST", "/session/ses%20a%2F1/message", 200, r#"{"parts":[]}"#);
    server.respond("GET", "/session/ses%20a%2F1/message", 200, r#"[{"id":"m1"}]"#);
    server.respond("GET", "/session/ses%20a%2F1/todo", 200, r#"[{"content":"x"}]"#);
    let temp = TempDir::new().unwrap();
    let api = api_for(server.config(), &temp);

    let sent = api
        .send_message("hello", None, Some(json!("anthropic/claude")), Some("build".to_string()))
        .await;
    assert_eq!(sent["success"], json!(true));
    assert_eq!(sent["sessionId"], json!("ses a/1"));

    let messages = api.list_messages(None, Some(5)).await;
    assert_eq!(messages["messages"], json!([{"id": "m1"}]));
    let todos = api.list_todos(None).await;
    assert_eq!(todos["todos"], json!([{"content": "x"}]));

    let requests = server.api_requests();
    let targets: Vec<_> = requests
        .iter()
        .map(|r| format!("{} {}", r.method, r.target))
        .collect();
    assert_eq!(
        targets,
        vec![
            "POST /session",
            "POST /session/ses%20a%2F1/message",
            "GET /session/ses%20a%2F1/message?limit=5",
            "GET /session/ses%20a%2F1/todo",
        ]
    );

    let body: Value = serde_json::from_str(&requests[1].body).unwrap();
    assert_eq!(
        body,
        json!({
            "parts": [{"type": "text", "text": "hello"}],
            "model": "anthropic/claude",
            "agent": "build",
        })
    );
}

#[tokio::test]
async fn test_backend_error_status_surfaces_in_result() {
    let server = MockServer::start().await;
    server.respond("GET", "/agent", 500, "agent registry unavailable");
    let temp = TempDir::new().unwrap();
    let api = api_for(server.config(), &temp);

    let agents = api.list_agents().await;
    assert_eq!(agents["success"], json!(false));
    assert_eq!(agents["agents"], json!([]));
    let error = agents["error"].as_str().unwrap();
    assert!(error.contains("500"), "{}", error);
    assert!(error.contains("agent registry unavailable"), "{}", error);
}

#[tokio::test]
async fn test_every_call_keeps_shape_when_server_is_down() {
    let temp = TempDir::new().unwrap();
    let api = api_for(ServerConfig::new("127.0.0.1", unused_port()), &temp);

    let results = [
        ("providers", api.get_providers().await),
        ("project", api.get_current_project().await),
        ("projects", api.list_projects().await),
        ("files", api.search_files("main").await),
        ("commands", api.list_commands().await),
        ("session", api.get_session("ses_1").await),
        ("result", api.execute_command("init", json!(""), Some("ses_1"), None, None).await),
    ];
    for (field, result) in results {
        assert_eq!(result["success"], json!(false), "{}", field);
        assert!(result.get(field).is_some(), "missing {}", field);
        assert!(result["error"].is_string(), "{}", field);
    }

    let streamed = api.stream_message("ses_1", "hi", None, None).await;
    assert_eq!(streamed["success"], json!(false));
}

// ─────────────────────────────────────────────────────────
// Live events
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_message_reply_arrives_on_event_stream() {
    let server = MockServer::start().await;
    server.respond("POST", "/session/ses_1/prompt_async", 204, "");
    server.set_event_lines([
        r#"data: {"type":"server.connected","properties":{}}"#,
        "data: {not json",
        r#"data: {"payload":{"type":"message.part.updated","properties":{"part":{"sessionID":"ses_1","text":"hi"}}}}"#,
    ]);
    let temp = TempDir::new().unwrap();
    let api = api_for(server.config(), &temp);

    assert_eq!(
        api.stream_message("ses_1", "hello", None, None).await,
        json!({"success": true, "error": null})
    );

    let (tx, mut rx) = mpsc::channel(8);
    let subscription = api.subscribe_events(tx);

    let first = rx.recv().await.unwrap();
    assert_eq!(first.kind(), "server.connected");
    let second = rx.recv().await.unwrap();
    assert_eq!(second.kind(), "message.part.updated");
    assert_eq!(second.session_id(), Some("ses_1"));

    let end = tokio::time::timeout(Duration::from_secs(5), subscription.finished())
        .await
        .expect("subscription should end with the stream");
    assert!(matches!(end, StreamEnd::Disconnected(_)));
}

// ─────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────

#[test]
fn test_settings_persist_across_instances() {
    let temp = TempDir::new().unwrap();
    let config = ServerConfig::new("127.0.0.1", unused_port());

    let first = api_for(config.clone(), &temp);
    assert_eq!(
        first.save_settings(&json!({"model": {"providerID": "anthropic"}})),
        json!({"success": true, "error": null})
    );

    let second = api_for(config, &temp);
    assert_eq!(
        second.load_settings()["settings"],
        json!({"model": {"providerID": "anthropic"}})
    );
}
