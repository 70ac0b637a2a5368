use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

use super::*;

#[derive(Default)]
struct MockServer {
    status_calls: AtomicUsize,
    control_calls: AtomicUsize,
    status_fails: AtomicBool,
    status_malformed: AtomicBool,
    created: Mutex<Vec<Value>>,
}

type Shared = Arc<MockServer>;

async fn status(State(server): State<Shared>) -> Response {
    server.status_calls.fetch_add(1, Ordering::SeqCst);
    if server.status_fails.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Traceback: something exploded"})),
        )
            .into_response();
    }
    if server.status_malformed.load(Ordering::SeqCst) {
        return (StatusCode::OK, "<html>not json</html>").into_response();
    }
    let running = server.control_calls.load(Ordering::SeqCst) > 0;
    Json(json!({
        "is_recording": running,
        "is_system_running": running,
        "current_cue_index": -1,
        "last_played_cue_id": null,
        "stats": {"total_detections": 3, "successful_matches": 1, "start_time": null},
        "uptime": 5.5
    }))
    .into_response()
}

async fn list_cues() -> Json<Value> {
    Json(json!({"cues": [
        {"id": 1, "hi_text": "one", "first_tokens": ["one"], "en_audio": "audio/1.mp3"},
        {"id": 2, "hi_text": "two", "first_tokens": ["two"], "en_audio": "audio/2.mp3"}
    ]}))
}

async fn create_cue(State(server): State<Shared>, Json(body): Json<Value>) -> Response {
    server.created.lock().expect("lock").push(body.clone());
    if body.get("id").is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing required fields"})),
        )
            .into_response();
    }
    Json(json!({"success": true, "cue": body})).into_response()
}

async fn update_cue(Path(id): Path<i64>, Json(body): Json<Value>) -> Response {
    if id != 1 {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "Cue not found"}))).into_response();
    }
    Json(json!({"success": true, "cue": body})).into_response()
}

async fn delete_cue(Path(id): Path<i64>) -> StatusCode {
    if id == 1 {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn transcriptions() -> Json<Value> {
    Json(json!({"transcriptions": [
        {"id": "a", "text": "first", "timestamp": "2024-03-01T10:00:00.000001", "matched_cue": null, "played_audio": null},
        {"id": "b", "text": "second", "timestamp": "2024-03-01T10:00:05", "matched_cue": null, "played_audio": null}
    ]}))
}

async fn play(Path(id): Path<i64>) -> Response {
    if id == 1 {
        Json(json!({"success": true})).into_response()
    } else {
        (StatusCode::NOT_FOUND, "plain text body").into_response()
    }
}

async fn control(State(server): State<Shared>, Path(action): Path<String>) -> Response {
    server.control_calls.fetch_add(1, Ordering::SeqCst);
    match action.as_str() {
        "start" => Json(json!({"success": true, "message": "System started"})).into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Already at last cue"})),
        )
            .into_response(),
    }
}

async fn spawn_mock_server() -> (String, Shared) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = Shared::default();
    let app = Router::new()
        .route("/api/status", get(status))
        .route("/api/cues", get(list_cues).post(create_cue))
        .route("/api/cues/:id", axum::routing::put(update_cue).delete(delete_cue))
        .route("/api/transcriptions", get(transcriptions))
        .route("/api/play/:id", get(play))
        .route("/api/control/:action", get(control))
        .with_state(Arc::clone(&server));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

fn client(base_url: &str) -> (RestClient, Arc<Store>) {
    let store = Arc::new(Store::new());
    (RestClient::new(base_url, Arc::clone(&store)), store)
}

#[tokio::test]
async fn fetch_status_replaces_status_and_clears_loading() {
    let (url, _server) = spawn_mock_server().await;
    let (rest, store) = client(&url);

    let status = rest.fetch_status().await.expect("status");
    assert_eq!(status.uptime_seconds, 5);

    let state = store.snapshot();
    assert_eq!(state.status.stats.total_detections, 3);
    assert!(!state.loading);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn fetch_cues_and_transcriptions_replace_collections() {
    let (url, _server) = spawn_mock_server().await;
    let (rest, store) = client(&url);
    store.dispatch(Transition::AddCue(Cue {
        id: CueId(77),
        text: "stale".into(),
        trigger_tokens: vec!["stale".into()],
        audio_path: "s.mp3".into(),
    }));

    rest.fetch_cues().await.expect("cues");
    rest.fetch_transcriptions().await.expect("transcriptions");

    let state = store.snapshot();
    let ids: Vec<_> = state.cues.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![CueId(1), CueId(2)]);
    assert_eq!(state.transcriptions[0].text, "second");
    assert_eq!(state.transcriptions[1].text, "first");
}

#[tokio::test]
async fn create_cue_sends_wire_names_and_appends() {
    let (url, server) = spawn_mock_server().await;
    let (rest, store) = client(&url);
    let draft = CueDraft::new("Good evening", ["Good", "Evening"], "audio/3.mp3")
        .and_then(|d| d.with_id(CueId(3)))
        .expect("draft");

    let cue = rest.create_cue(&draft).await.expect("create");
    assert_eq!(cue.trigger_tokens, vec!["good", "evening"]);

    let sent = server.created.lock().expect("lock")[0].clone();
    assert_eq!(sent["hi_text"], "Good evening");
    assert_eq!(sent["en_audio"], "audio/3.mp3");
    assert_eq!(store.snapshot().cues, vec![cue]);
}

#[tokio::test]
async fn rejected_create_surfaces_server_message() {
    let (url, _server) = spawn_mock_server().await;
    let (rest, store) = client(&url);
    let draft = CueDraft::new("text", ["text"], "a.mp3").expect("draft");

    let err = rest.create_cue(&draft).await.expect_err("should fail");
    assert!(matches!(err, ClientError::Request { status: 400, .. }));

    let state = store.snapshot();
    assert_eq!(state.error.as_deref(), Some("Missing required fields"));
    assert!(state.cues.is_empty());
}

#[tokio::test]
async fn update_of_missing_cue_reports_not_found() {
    let (url, _server) = spawn_mock_server().await;
    let (rest, store) = client(&url);
    let draft = CueDraft::new("b", ["b"], "y").expect("draft");

    let err = rest
        .update_cue(CueId(5), &draft)
        .await
        .expect_err("should fail");
    assert_eq!(err.status(), Some(404));
    assert_eq!(store.snapshot().error.as_deref(), Some("Cue not found"));
}

#[tokio::test]
async fn update_replaces_matching_cue() {
    let (url, _server) = spawn_mock_server().await;
    let (rest, store) = client(&url);
    rest.fetch_cues().await.expect("cues");

    let draft = CueDraft::new("uno", ["uno"], "audio/uno.mp3").expect("draft");
    rest.update_cue(CueId(1), &draft).await.expect("update");

    let state = store.snapshot();
    assert_eq!(state.cues.len(), 2);
    assert_eq!(state.cues[0].text, "uno");
}

#[tokio::test]
async fn delete_removes_cue_only_on_success() {
    let (url, _server) = spawn_mock_server().await;
    let (rest, store) = client(&url);
    rest.fetch_cues().await.expect("cues");

    rest.delete_cue(CueId(1)).await.expect("delete");
    assert_eq!(store.snapshot().cues.len(), 1);

    let err = rest.delete_cue(CueId(2)).await.expect_err("should fail");
    assert_eq!(err.to_string(), "request failed with status 404");
    assert_eq!(store.snapshot().cues.len(), 1);
}

#[tokio::test]
async fn play_returns_ack_without_touching_state() {
    let (url, _server) = spawn_mock_server().await;
    let (rest, store) = client(&url);

    let ack = rest.play_cue(CueId(1)).await.expect("play");
    assert_eq!(ack["success"], true);
    assert_eq!(store.snapshot().currently_playing, None);

    rest.play_cue(CueId(9)).await.expect_err("should fail");
    assert_eq!(
        store.snapshot().error.as_deref(),
        Some("request failed with status 404")
    );
}

#[tokio::test]
async fn control_refetches_status_after_command() {
    let (url, server) = spawn_mock_server().await;
    let (rest, store) = client(&url);

    rest.control(ControlCommand::Start).await.expect("start");

    assert_eq!(server.control_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.status_calls.load(Ordering::SeqCst), 1);
    assert!(store.snapshot().status.is_system_running);
}

#[tokio::test]
async fn failed_control_skips_status_refetch() {
    let (url, server) = spawn_mock_server().await;
    let (rest, store) = client(&url);

    let err = rest
        .control(ControlCommand::Next)
        .await
        .expect_err("should fail");
    assert!(err.is_user_visible());
    assert_eq!(server.status_calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.snapshot().error.as_deref(), Some("Already at last cue"));
}

#[tokio::test]
async fn server_errors_use_generic_message() {
    let (url, server) = spawn_mock_server().await;
    let (rest, store) = client(&url);
    server.status_fails.store(true, Ordering::SeqCst);

    let err = rest.fetch_status().await.expect_err("should fail");
    assert!(matches!(err, ClientError::Server { status: Some(500), .. }));

    let state = store.snapshot();
    assert_eq!(state.error.as_deref(), Some("server error (500)"));
    assert!(!state.loading);
}

#[tokio::test]
async fn malformed_success_body_is_a_server_error() {
    let (url, server) = spawn_mock_server().await;
    let (rest, store) = client(&url);
    server.status_malformed.store(true, Ordering::SeqCst);

    let err = rest.fetch_status().await.expect_err("should fail");
    assert_eq!(err.to_string(), "malformed response from server");
    assert_eq!(
        store.snapshot().error.as_deref(),
        Some("malformed response from server")
    );
}

#[tokio::test]
async fn unreachable_server_is_not_written_to_error_slot() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let (rest, store) = client(&format!("http://{addr}"));

    let err = rest.fetch_status().await.expect_err("should fail");
    assert!(matches!(err, ClientError::Transport(_)));
    assert!(!err.is_user_visible());

    let state = store.snapshot();
    assert_eq!(state.error, None);
    assert!(!state.loading);
}

#[test]
fn base_url_trailing_slash_is_normalized() {
    let store = Arc::new(Store::new());
    let rest = RestClient::new("http://localhost:2000/", store);
    assert_eq!(rest.url("/api/status"), "http://localhost:2000/api/status");
    assert_eq!(rest.base_url(), "http://localhost:2000");
}
