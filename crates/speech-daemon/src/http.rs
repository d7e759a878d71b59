use crate::core::DaemonEvent;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use speech_proto::protocol::{Command, SystemStatus};
use speech_proto::state::StateManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

pub fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<DaemonEvent>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/refresh", post(refresh))
        .route("/api/authorize", post(authorize))
        .route("/api/revoke", post(revoke))
        .route("/api/played/clear", post(clear_played))
        .with_state(HttpState {
            state_manager,
            event_tx,
        })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_status(State(state): State<HttpState>) -> Json<SystemStatus> {
    Json(state.state_manager.get_status().await)
}

async fn send_command(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state
        .event_tx
        .send(DaemonEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("HTTP API: daemon core is gone");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn refresh(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Refresh).await
}

async fn authorize(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Authorize).await
}

async fn revoke(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Revoke).await
}

async fn clear_played(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::ClearPlayed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_returns_published_state() {
        let manager = Arc::new(StateManager::new());
        manager
            .publish(SystemStatus {
                queue_length: 1,
                queued: vec!["a.mp3".into()],
                authorized: true,
                ..SystemStatus::default()
            })
            .await;
        let (event_tx, _event_rx) = mpsc::channel(4);

        let response = router(manager, event_tx)
            .oneshot(request(Method::GET, "/api/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: SystemStatus = serde_json::from_slice(&body).unwrap();
        assert_eq!(status.queue_length, 1);
        assert_eq!(status.queued, vec!["a.mp3"]);
        assert!(status.authorized);
    }

    #[tokio::test]
    async fn test_commands_are_forwarded_to_core() {
        let manager = Arc::new(StateManager::new());
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let app = router(manager, event_tx);

        let cases = [
            ("/api/refresh", Command::Refresh),
            ("/api/authorize", Command::Authorize),
            ("/api/revoke", Command::Revoke),
            ("/api/played/clear", Command::ClearPlayed),
        ];
        for (uri, expected) in cases {
            let response = app
                .clone()
                .oneshot(request(Method::POST, uri))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            match event_rx.recv().await {
                Some(DaemonEvent::ClientCommand(cmd)) => assert_eq!(cmd, expected),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_command_without_core_is_unavailable() {
        let manager = Arc::new(StateManager::new());
        let (event_tx, event_rx) = mpsc::channel(4);
        drop(event_rx);

        let response = router(manager, event_tx)
            .oneshot(request(Method::POST, "/api/refresh"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_commands_require_post() {
        let manager = Arc::new(StateManager::new());
        let (event_tx, _event_rx) = mpsc::channel(4);

        let response = router(manager, event_tx)
            .oneshot(request(Method::GET, "/api/refresh"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
