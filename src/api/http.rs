//! Gateway HTTP Server
//!
//! Public entry point in front of the application server. The replication
//! endpoints are served here; every other request is forwarded to the
//! application, with mutating requests passing through the write gate.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http_body_util::LengthLimitError;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use super::gate::{is_mutating, write_gate};
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::health::{HealthSnapshot, ReplicationMonitor};
use crate::sqlite::{self, CheckpointResult};

/// Largest request body forwarded to the application server
const MAX_FORWARD_BODY: usize = 128 * 1024 * 1024;

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP client for forwarding to the application server.
///
/// No overall timeout: realtime subscriptions are long-lived streams.
static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Shared gateway state
pub struct AppState {
    /// Replication health, re-checked by the write gate
    pub monitor: Arc<ReplicationMonitor>,
    /// Database checkpointed by `/api/checkpoint` and after writes
    pub db_path: PathBuf,
    /// Base URL of the application server
    pub upstream: String,
}

impl AppState {
    pub fn new(monitor: Arc<ReplicationMonitor>, db_path: PathBuf, upstream: &str) -> Self {
        let upstream = if upstream.starts_with("http://") || upstream.starts_with("https://") {
            upstream.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", upstream.trim_end_matches('/'))
        };
        Self {
            monitor,
            db_path,
            upstream,
        }
    }
}

/// Gateway HTTP server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>) -> Router {
        let forwarded: Router = Router::new()
            .fallback(forward)
            .layer(middleware::from_fn_with_state(
                Arc::clone(&state.monitor),
                write_gate,
            ))
            .with_state(Arc::clone(&state));

        Router::new()
            .route("/api/checkpoint", post(handle_checkpoint))
            .route("/api/replication/health", get(handle_health))
            .with_state(state)
            .fallback_service(forwarded)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = Self::create_router(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!(
            "Gateway listening on {}, forwarding to {}",
            self.config.bind_address,
            self.state.upstream
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Checkpoint response
#[derive(Debug, Serialize)]
pub struct CheckpointResponse {
    pub status: String,
    /// Absent when the database does not exist yet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CheckpointResult>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error_response(status: StatusCode, error: String, code: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error,
            code: code.to_string(),
        }),
    )
        .into_response()
}

// ============ Handlers ============

async fn handle_checkpoint(State(state): State<Arc<AppState>>) -> Response {
    match sqlite::checkpoint_async(state.db_path.clone()).await {
        Ok(result) => Json(CheckpointResponse {
            status: "checkpoint completed".to_string(),
            result,
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Checkpoint failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
                "CHECKPOINT_FAILED",
            )
        }
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthSnapshot> {
    Json(state.monitor.health().snapshot().await)
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Forward a request to the application server and stream its response back
async fn forward(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let mutating = is_mutating(&parts.method);
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream, path);

    let body = match axum::body::to_bytes(body, MAX_FORWARD_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let (status, code) = body_read_failure(&e);
            return error_response(status, format!("Failed to read request body: {}", e), code);
        }
    };

    let Ok(method) = reqwest::Method::from_bytes(parts.method.as_str().as_bytes()) else {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Unsupported method {}", parts.method),
            "METHOD_NOT_ALLOWED",
        );
    };

    let mut upstream = HTTP_CLIENT.request(method, &url);
    for (name, value) in parts.headers.iter() {
        if *name == header::HOST || is_hop_by_hop(name.as_str()) {
            continue;
        }
        upstream = upstream.header(name.as_str(), value.as_bytes());
    }

    tracing::debug!("Forwarding {} {}", parts.method, url);
    let response = match upstream.body(body.to_vec()).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Failed to forward to application server: {}", e);
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("Failed to contact application server: {}", e),
                "UPSTREAM_UNAVAILABLE",
            );
        }
    };

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    if mutating && status.is_success() {
        schedule_checkpoint(state.db_path.clone());
    }

    let headers = response.headers().clone();
    let mut out = Response::new(Body::from_stream(response.bytes_stream()));
    *out.status_mut() = status;
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.headers_mut().append(name, value);
        }
    }
    out
}

/// 413 when the body hit the forwarding limit, 400 for any other read error
fn body_read_failure(e: &axum::Error) -> (StatusCode, &'static str) {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = source {
        if err.is::<LengthLimitError>() {
            return (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE");
        }
        source = err.source();
    }
    (StatusCode::BAD_REQUEST, "INVALID_BODY")
}

/// Checkpoint in the background after a committed write
fn schedule_checkpoint(db_path: PathBuf) {
    tokio::spawn(async move {
        if let Err(e) = sqlite::checkpoint_async(db_path).await {
            tracing::warn!("Checkpoint after write failed: {}", e);
        }
    });
}
