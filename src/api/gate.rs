//! Write gate middleware.
//!
//! Mutating requests are admitted only while replication is healthy.
//! Every such request triggers a fresh health check; reads pass untouched.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use super::http::ErrorResponse;
use crate::health::ReplicationMonitor;

/// Error code returned while writes are blocked
pub const REPLICATION_UNHEALTHY: &str = "REPLICATION_UNHEALTHY";

/// Methods that can change application state
pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Reject mutating requests with 503 unless replication is healthy
pub async fn write_gate(
    State(monitor): State<Arc<ReplicationMonitor>>,
    request: Request,
    next: Next,
) -> Response {
    if !is_mutating(request.method()) {
        return next.run(request).await;
    }

    let snapshot = monitor.check().await;
    if snapshot.healthy {
        return next.run(request).await;
    }

    tracing::warn!(
        method = %request.method(),
        path = %request.uri().path(),
        "Rejected write, replication is unhealthy"
    );
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "Replication is unhealthy, writes are temporarily disabled".to_string(),
            code: REPLICATION_UNHEALTHY.to_string(),
        }),
    )
        .into_response()
}
