//! Pocketstream - Durable single-node PocketBase with Garage and Litestream
//!
//! Container entrypoint tooling that makes a single-node application
//! server durable: it provisions a local Garage object-storage node once,
//! keeps the SQLite database continuously replicated with Litestream, and
//! refuses writes whenever replication is unhealthy.
//!
//! # Architecture
//!
//! Two independent pipelines share one binary:
//!
//! - [`garage::Bootstrapper`] provisions the storage node (layout, access
//!   key, buckets, grants) exactly once, then hands off to `garage server`.
//! - [`litestream::ReplicationSupervisor`] writes the replication config,
//!   restores a missing database, starts `litestream replicate` and keeps
//!   the database checkpointed and the replication health current.
//!
//! The [`api`] gateway sits in front of the application server and gates
//! mutating requests on [`health::ReplicationMonitor`].

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod garage;
pub mod health;
pub mod litestream;
pub mod process;
pub mod sqlite;
pub mod tasks;

pub use config::PocketstreamConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::PocketstreamConfig;
    pub use crate::error::{BootstrapStep, Error, Result};
    pub use crate::garage::{BootstrapOutcome, Bootstrapper};
    pub use crate::health::{HealthSnapshot, ReplicationHealth, ReplicationMonitor};
    pub use crate::litestream::ReplicationSupervisor;
    pub use crate::process::{CommandSpec, ProcessRunner, SystemRunner};
}
