//! Pocketstream Error Types

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for Pocketstream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Steps of the Garage bootstrap sequence, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    ServerStarting,
    WaitingReady,
    IdentityResolved,
    LayoutAssigned,
    LayoutApplied,
    KeyEnsured,
    BucketsEnsured,
    PermissionsGranted,
    Finalized,
    ServerStopped,
    Handoff,
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapStep::ServerStarting => "server starting",
            BootstrapStep::WaitingReady => "waiting for readiness",
            BootstrapStep::IdentityResolved => "node identity",
            BootstrapStep::LayoutAssigned => "layout assign",
            BootstrapStep::LayoutApplied => "layout apply",
            BootstrapStep::KeyEnsured => "access key",
            BootstrapStep::BucketsEnsured => "buckets",
            BootstrapStep::PermissionsGranted => "bucket permissions",
            BootstrapStep::Finalized => "marker file",
            BootstrapStep::ServerStopped => "server stop",
            BootstrapStep::Handoff => "handoff",
        };
        f.write_str(name)
    }
}

/// Pocketstream error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render litestream config: {0}")]
    ConfigRender(String),

    #[error("POCKETBASE_ENCRYPTION_KEY must be a 32-character hexadecimal string (generated with 'openssl rand -hex 16')")]
    InvalidEncryptionKey,

    #[error("Unsupported replica type: {0}")]
    UnsupportedReplicaType(String),

    // Process errors
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Failed to hand off to {program}: {source}")]
    Handoff {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process {0} exited before becoming ready")]
    ProcessExited(String),

    #[error("Timed out after {0} attempts waiting for readiness")]
    ReadyTimeout(u32),

    // Bootstrap errors
    #[error("Bootstrap failed at {step}: {reason}")]
    Bootstrap { step: BootstrapStep, reason: String },

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap any error as a fatal failure of a bootstrap step
    pub fn bootstrap(step: BootstrapStep, reason: impl fmt::Display) -> Self {
        Error::Bootstrap {
            step,
            reason: reason.to_string(),
        }
    }

    /// The bootstrap step that failed, if this is a bootstrap error
    pub fn bootstrap_step(&self) -> Option<BootstrapStep> {
        match self {
            Error::Bootstrap { step, .. } => Some(*step),
            _ => None,
        }
    }
}
