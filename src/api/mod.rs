//! HTTP API Module
//!
//! Gateway in front of the application server: replication endpoints,
//! request forwarding and the write gate.

mod gate;
mod http;

pub use gate::{is_mutating, write_gate, REPLICATION_UNHEALTHY};
pub use http::{AppState, CheckpointResponse, ErrorResponse, HttpServer};
