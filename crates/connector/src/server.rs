use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::metrics::encode_metrics;
use crate::polymarket::ConnectionState;

/// Fixed liveness reply
#[derive(Serialize)]
pub struct PingResponse {
    pub message: &'static str,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub feed: String,
    pub connection: String,
    pub trades: u64,
}

/// Shared state for health endpoints
#[derive(Clone)]
pub struct ServerState {
    pub feed_name: String,
    pub connection: watch::Receiver<ConnectionState>,
    pub trades: Arc<AtomicU64>,
}

impl ServerState {
    pub fn new(
        feed_name: impl Into<String>,
        connection: watch::Receiver<ConnectionState>,
        trades: Arc<AtomicU64>,
    ) -> Self {
        Self {
            feed_name: feed_name.into(),
            connection,
            trades,
        }
    }

    fn health(&self, status: &str) -> HealthResponse {
        HealthResponse {
            status: status.to_string(),
            feed: self.feed_name.clone(),
            connection: self.connection.borrow().to_string(),
            trades: self.trades.load(Ordering::Relaxed),
        }
    }
}

/// Ping endpoint - same payload whatever the feed is doing
async fn ping() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(state.health("ok"))
}

/// Ready endpoint - returns 200 only while the feed is running
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    let running = *state.connection.borrow() == ConnectionState::Running;
    if running {
        (StatusCode::OK, Json(state.health("ready")))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(state.health("not_ready")))
    }
}

async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Create the health server router
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server until `shutdown` resolves
pub async fn run_server<F>(addr: SocketAddr, state: ServerState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Health server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn create_test_state(state: ConnectionState) -> (ServerState, watch::Sender<ConnectionState>) {
        let (tx, rx) = watch::channel(state);
        (
            ServerState::new("polymarket-live", rx, Arc::new(AtomicU64::new(7))),
            tx,
        )
    }

    async fn get_path(app: Router, path: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_ping_is_fixed() {
        let (state, _tx) = create_test_state(ConnectionState::Closed);
        let (status, body) = get_path(create_router(state), "/ping").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"message":"pong"}"#);
    }

    #[tokio::test]
    async fn test_health_reports_connection_state() {
        let (state, _tx) = create_test_state(ConnectionState::Closed);
        let (status, body) = get_path(create_router(state), "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connection"], "closed");
        assert_eq!(json["trades"], 7);
    }

    #[tokio::test]
    async fn test_ready_when_running() {
        let (state, _tx) = create_test_state(ConnectionState::Running);
        let (status, _) = get_path(create_router(state), "/ready").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_follows_state_changes() {
        let (state, tx) = create_test_state(ConnectionState::Subscribing);
        let app = create_router(state);

        let (status, _) = get_path(app.clone(), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        tx.send(ConnectionState::Running).unwrap();
        let (status, _) = get_path(app.clone(), "/ready").await;
        assert_eq!(status, StatusCode::OK);

        tx.send(ConnectionState::Closed).unwrap();
        let (status, body) = get_path(app, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("not_ready"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        crate::metrics::inc_frame("skip");
        let (state, _tx) = create_test_state(ConnectionState::Running);
        let (status, body) = get_path(create_router(state), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("pmi_frames_total"));
    }
}
