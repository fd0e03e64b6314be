//! Background task routes: submission, queries, cancellation and the task
//! event WebSocket.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use taskman::{TaskEvent, TaskId};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{ListTasksQuery, StartCopyRequest, TaskEventMessage, TaskSubmittedResponse};
use crate::api::server::AppState;
use crate::copy::CopyTask;
use crate::tasks::MediaTaskState;

/// Create the tasks router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks))
        .route("/copy", post(start_copy))
        .route("/ws", get(task_events_ws))
        .route("/{id}", get(get_task).delete(cancel_task))
}

/// Submit a copy operation.
///
/// Input errors (missing source, existing destination, traversal) are
/// rejected here, before any background work starts; everything after
/// submission is observed through the query endpoints.
async fn start_copy(
    State(state): State<AppState>,
    Json(request): Json<StartCopyRequest>,
) -> ApiResult<impl IntoResponse> {
    let source = state.media_root.resolve_existing(&request.source)?;
    let destination = state.media_root.resolve(&request.destination)?;
    if destination.exists() {
        return Err(ApiError::conflict(format!(
            "destination already exists: {}",
            request.destination
        )));
    }

    let is_directory = tokio::fs::metadata(&source)
        .await
        .map_err(|e| crate::utils::fs::io_error("reading source metadata", &source, e))?
        .is_dir();

    let task_id = state
        .task_manager
        .submit(CopyTask::new(source, destination, is_directory));
    Ok((
        StatusCode::ACCEPTED,
        Json(TaskSubmittedResponse { task_id }),
    ))
}

/// List all known tasks, optionally filtered by kind.
async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Json<Vec<MediaTaskState>> {
    Json(state.task_manager.list(query.kind.as_deref()))
}

/// Get one task's state by id.
async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MediaTaskState>> {
    let id = parse_task_id(&id)?;
    state
        .task_manager
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("task {} not found", id)))
}

/// Cancel a running task.
async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_task_id(&id)?;
    if state.task_manager.cancel(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("no active task {}", id)))
    }
}

fn parse_task_id(raw: &str) -> ApiResult<TaskId> {
    TaskId::parse(raw).ok_or_else(|| ApiError::bad_request(format!("invalid task id: {}", raw)))
}

/// WebSocket handler for task event streaming.
///
/// Sends an initial snapshot of all known tasks, then relays `updated` and
/// `removed` events as they are broadcast by the task engine.
async fn task_events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // 1. Initial snapshot.
    let snapshot = TaskEventMessage::Snapshot {
        tasks: state.task_manager.list(None),
    };
    if send_json(&mut sender, &snapshot).await.is_err() {
        debug!("failed to send initial snapshot, client disconnected");
        return;
    }

    // 2. Subscribe to broadcast, then relay.
    let mut events = state.task_manager.subscribe();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("task event client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let message = match event {
                            TaskEvent::Updated(task) => TaskEventMessage::Updated { state: task },
                            TaskEvent::Removed(id) => TaskEventMessage::Removed { id },
                        };
                        if send_json(&mut sender, &message).await.is_err() {
                            debug!("failed to send task event, client may be gone");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("task event receiver lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn send_json(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    message: &TaskEventMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_else(|e| {
        warn!("failed to encode task event: {}", e);
        "{}".to_string()
    });
    sender.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::api::routes;
    use crate::library::MediaRoot;
    use crate::streaming::TranscoderConfig;
    use taskman::{RetentionConfig, TaskManager, TaskStatus};

    fn test_state(root: &std::path::Path) -> AppState {
        AppState {
            start_time: Instant::now(),
            media_root: Arc::new(MediaRoot::new(root)),
            task_manager: Arc::new(TaskManager::new()),
            transcoder: TranscoderConfig::default(),
        }
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn copy_request(source: &str, destination: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/tasks/copy")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({"source": source, "destination": destination}).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_copy_returns_task_id_and_completes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mkv"), vec![7u8; 4096]).unwrap();

        let state = test_state(dir.path());
        let app = routes::create_router(state.clone());

        let response = app
            .oneshot(copy_request("a.mkv", "b.mkv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = response_json(response).await;
        let id = TaskId::parse(body["taskId"].as_str().unwrap()).unwrap();

        for _ in 0..500 {
            if let Some(task) = state.task_manager.get(id)
                && task.status.is_terminal()
            {
                assert_eq!(task.status, TaskStatus::Completed);
                assert!(dir.path().join("b.mkv").exists());
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("copy task never finished");
    }

    #[tokio::test]
    async fn test_start_copy_rejects_missing_source() {
        let dir = TempDir::new().unwrap();
        let app = routes::create_router(test_state(dir.path()));

        let response = app
            .oneshot(copy_request("missing.mkv", "out.mkv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_copy_rejects_existing_destination() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("b.mkv"), b"y").unwrap();

        let app = routes::create_router(test_state(dir.path()));
        let response = app.oneshot(copy_request("a.mkv", "b.mkv")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_start_copy_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"x").unwrap();

        let app = routes::create_router(test_state(dir.path()));
        let response = app
            .oneshot(copy_request("a.mkv", "../outside.mkv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_unknown_task_is_404_and_bad_id_is_400() {
        let dir = TempDir::new().unwrap();
        let state = test_state(dir.path());

        let response = routes::create_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/api/tasks/{}", TaskId::new()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = routes::create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/tasks/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_404() {
        let dir = TempDir::new().unwrap();
        let app = routes::create_router(test_state(dir.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/tasks/{}", TaskId::new()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_tasks_filters_by_kind() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"x").unwrap();

        let state = test_state(dir.path());
        let app = routes::create_router(state);
        let response = app
            .clone()
            .oneshot(copy_request("a.mkv", "b.mkv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let listed = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/tasks?kind=copy")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(listed.status(), StatusCode::OK);
        let body = response_json(listed).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let other = app
            .oneshot(
                Request::builder()
                    .uri("/api/tasks?kind=sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response_json(other).await;
        assert_eq!(body.as_array().unwrap().len(), 0);
    }

    type WsClient = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn next_ws_json(socket: &mut WsClient) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("timed out waiting for a WebSocket message")
                .expect("WebSocket closed early")
                .unwrap();
            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_ws_relays_snapshot_then_updates_then_removal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.mkv"), vec![7u8; 64 * 1024]).unwrap();

        // Short retention so the eviction broadcast arrives within the test.
        let state = AppState {
            start_time: Instant::now(),
            media_root: Arc::new(MediaRoot::new(dir.path())),
            task_manager: Arc::new(TaskManager::with_retention(RetentionConfig {
                completed: Duration::from_millis(100),
                cancelled: Duration::from_millis(100),
                failed: Duration::from_millis(100),
            })),
            transcoder: TranscoderConfig::default(),
        };
        let app = routes::create_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/api/tasks/ws"))
                .await
                .unwrap();

        // The snapshot always arrives first; nothing has been submitted yet.
        let first = next_ws_json(&mut socket).await;
        assert_eq!(first["event"], "snapshot");
        assert!(first["tasks"].as_array().unwrap().is_empty());

        // Give the relay a moment to move from the snapshot send into its
        // subscribe loop before events start flowing.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let id = state.task_manager.submit(CopyTask::new(
            dir.path().join("a.mkv"),
            dir.path().join("b.mkv"),
            false,
        ));

        let mut saw_terminal_update = false;
        loop {
            let event = next_ws_json(&mut socket).await;
            match event["event"].as_str().unwrap() {
                "updated" => {
                    assert_eq!(event["state"]["id"], id.to_string());
                    if event["state"]["status"] == "completed" {
                        saw_terminal_update = true;
                    }
                }
                "removed" => {
                    assert_eq!(event["id"], id.to_string());
                    assert!(saw_terminal_update, "removal arrived before the terminal update");
                    break;
                }
                other => panic!("unexpected event type: {other}"),
            }
        }
    }
}
