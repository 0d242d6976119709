//! Integration tests for the per-job event stream.
//!
//! Each test pairs a wiremock `/prompt` endpoint with a scripted
//! WebSocket server and drives [`EventStream`] to its end.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay_comfyui::{ComfyUIApi, ComfyUIBridge, ComfyUIClient, EventStream, StreamError, StreamEvent};

use common::{preview, spawn_ws, text};

async fn prompt_server(prompt_id: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"prompt_id": prompt_id, "number": 0})),
        )
        .mount(&server)
        .await;
    server
}

fn bridge(ws_url: &str, api_url: &str, timeout: Option<Duration>) -> ComfyUIBridge {
    ComfyUIBridge::new(
        ComfyUIClient::new(ws_url.to_string(), Some(Duration::from_secs(2))),
        Arc::new(ComfyUIApi::new(api_url.to_string(), Duration::from_secs(5))),
        timeout,
    )
}

async fn drain(mut events: EventStream) -> Vec<Result<StreamEvent, StreamError>> {
    let mut out = Vec::new();
    while let Some(item) = events.next_event().await {
        out.push(item);
    }
    out
}

fn done(prompt_id: &str) -> serde_json::Value {
    json!({"type": "executing", "data": {"node": null, "prompt_id": prompt_id}})
}

// ---------------------------------------------------------------------------
// Test: missing client_id yields one synthetic error and no network traffic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_client_id_yields_single_error_without_network() {
    let api = prompt_server("p1").await;
    let ws = spawn_ws(vec![], false).await;

    let events = drain(bridge(&ws.url, &api.uri(), None).stream(json!({"prompt": {}}))).await;

    assert_eq!(events.len(), 1);
    let event = events.into_iter().next().unwrap().expect("synthetic event");
    assert_eq!(event.kind, "execution_error");
    assert_eq!(event.data["exception_message"], "client_id is required");

    assert_eq!(ws.accepted.load(Ordering::SeqCst), 0);
    assert!(api.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn null_client_id_is_treated_as_missing() {
    let api = prompt_server("p1").await;
    let ws = spawn_ws(vec![], false).await;

    let events = drain(bridge(&ws.url, &api.uri(), None).stream(json!({"client_id": null}))).await;

    assert_eq!(events.len(), 1);
    assert_matches!(&events[0], Ok(e) if e.kind == "execution_error");
    assert!(api.received_requests().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: the socket is scoped by clientId
// ---------------------------------------------------------------------------

#[tokio::test]
async fn socket_url_carries_client_id() {
    let api = prompt_server("p1").await;
    let ws = spawn_ws(vec![text(done("p1"))], false).await;

    let events = drain(bridge(&ws.url, &api.uri(), None).stream(json!({"client_id": "abc"}))).await;

    assert_eq!(events.len(), 1);
    assert_eq!(ws.handshake_uri.await.unwrap(), "/ws?clientId=abc");
}

// ---------------------------------------------------------------------------
// Test: binary preview frames produce no events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn binary_frames_are_discarded() {
    let api = prompt_server("p1").await;
    let ws = spawn_ws(
        vec![
            preview(),
            text(json!({"type": "progress", "data": {"value": 1, "max": 20}})),
            preview(),
            preview(),
            text(done("p1")),
        ],
        false,
    )
    .await;

    let events = drain(bridge(&ws.url, &api.uri(), None).stream(json!({"client_id": "abc"}))).await;

    let kinds: Vec<String> = events
        .into_iter()
        .map(|e| e.expect("no faults").kind)
        .collect();
    assert_eq!(kinds, vec!["progress", "executing"]);
}

// ---------------------------------------------------------------------------
// Test: termination requires a null node and the submitted prompt_id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn termination_is_exact() {
    let api = prompt_server("p1").await;
    let ws = spawn_ws(
        vec![
            text(json!({"type": "executing", "data": {"node": "3", "prompt_id": "p1"}})),
            text(done("other-prompt")),
            text(json!({"type": "executed", "data": {"node": "9", "output": {}, "prompt_id": "p1"}})),
            text(done("p1")),
            text(json!({"type": "status", "data": {"after": "completion"}})),
        ],
        false,
    )
    .await;

    let events = drain(bridge(&ws.url, &api.uri(), None).stream(json!({"client_id": "abc"}))).await;

    assert_eq!(events.len(), 4);
    let last = events.last().unwrap().as_ref().unwrap();
    assert!(last.is_completion_of("p1"));
    assert_eq!(events[1].as_ref().unwrap().data["prompt_id"], "other-prompt");
}

// ---------------------------------------------------------------------------
// Test: events are relayed untouched and in arrival order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_pass_through_unmodified() {
    let api = prompt_server("p1").await;
    let first = json!({"type": "execution_start", "data": {"prompt_id": "p1", "timestamp": 1}});
    let second = json!({"type": "execution_cached", "data": {"nodes": ["1", "2"], "prompt_id": "p1"}});
    let ws = spawn_ws(vec![text(first.clone()), text(second.clone()), text(done("p1"))], false).await;

    let events: Vec<serde_json::Value> = bridge(&ws.url, &api.uri(), None)
        .stream(json!({"client_id": "abc"}))
        .into_stream()
        .map(|e| e.expect("no faults").into_value())
        .collect()
        .await;

    assert_eq!(events, vec![first, second, done("p1")]);
}

// ---------------------------------------------------------------------------
// Test: the wall-clock timeout produces a synthetic error event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_yields_synthetic_error() {
    let api = prompt_server("p1").await;
    let ws = spawn_ws(vec![], false).await;

    let events = drain(
        bridge(&ws.url, &api.uri(), Some(Duration::from_millis(200)))
            .stream(json!({"client_id": "abc"})),
    )
    .await;

    assert_eq!(events.len(), 1);
    let event = events.into_iter().next().unwrap().expect("synthetic event");
    assert_eq!(event.kind, "execution_error");
    assert_eq!(event.data["exception_message"], "timeout");
}

#[tokio::test]
async fn timeout_after_partial_progress_keeps_earlier_events() {
    let api = prompt_server("p1").await;
    let ws = spawn_ws(
        vec![text(json!({"type": "executing", "data": {"node": "3", "prompt_id": "p1"}}))],
        false,
    )
    .await;

    let events = drain(
        bridge(&ws.url, &api.uri(), Some(Duration::from_millis(200)))
            .stream(json!({"client_id": "abc"})),
    )
    .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].as_ref().unwrap().kind, "executing");
    assert_eq!(events[1].as_ref().unwrap().kind, "execution_error");
}

// ---------------------------------------------------------------------------
// Test: faults end the stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_frame_ends_stream_with_error() {
    let api = prompt_server("p1").await;
    let ws = spawn_ws(
        vec![
            text(json!({"type": "status", "data": {}})),
            tokio_tungstenite::tungstenite::Message::Text("{not json".to_string()),
            text(done("p1")),
        ],
        false,
    )
    .await;

    let events = drain(bridge(&ws.url, &api.uri(), None).stream(json!({"client_id": "abc"}))).await;

    assert_eq!(events.len(), 2);
    assert!(events[0].is_ok());
    assert_matches!(events[1], Err(StreamError::MalformedFrame(_)));
}

#[tokio::test]
async fn server_close_before_completion_is_a_fault() {
    let api = prompt_server("p1").await;
    let ws = spawn_ws(vec![text(json!({"type": "status", "data": {}}))], true).await;

    let events = drain(bridge(&ws.url, &api.uri(), None).stream(json!({"client_id": "abc"}))).await;

    assert_eq!(events.len(), 2);
    assert_matches!(&events[1], Err(StreamError::Closed { prompt_id }) if prompt_id == "p1");
}

#[tokio::test]
async fn submission_failure_ends_stream_with_error() {
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad workflow"))
        .mount(&api)
        .await;
    let ws = spawn_ws(vec![text(done("p1"))], false).await;

    let events = drain(bridge(&ws.url, &api.uri(), None).stream(json!({"client_id": "abc"}))).await;

    assert_eq!(events.len(), 1);
    assert_matches!(events[0], Err(StreamError::Submit(_)));
}

#[tokio::test]
async fn connect_failure_ends_stream_with_error() {
    let api = prompt_server("p1").await;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let events = drain(
        bridge(&format!("ws://{addr}"), &api.uri(), None).stream(json!({"client_id": "abc"})),
    )
    .await;

    assert_eq!(events.len(), 1);
    assert_matches!(events[0], Err(StreamError::Connect(_)));
    assert!(api.received_requests().await.unwrap().is_empty());
}
