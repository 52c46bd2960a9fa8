//! Litestream Module
//!
//! Continuous replication of the application database: configuration
//! synthesis, restore-on-start and supervision of `litestream replicate`.

mod cli;
pub mod config;
mod supervisor;

pub use cli::LitestreamCli;
pub use config::{synthesize, LitestreamFile, WriteOutcome};
pub use supervisor::{ReplicationSupervisor, RestoreOutcome, SteadyState};
