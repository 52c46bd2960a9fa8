//! Replication Health
//!
//! Process-wide view of whether writes are currently being replicated.
//! The state starts unhealthy and is only ever changed by
//! [`ReplicationMonitor::check`] or by the replicator exiting.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::config::LitestreamConfig;
use crate::litestream::LitestreamCli;
use crate::process::{BackgroundProcess, ProcessRunner};

/// Background process shared between the supervisor and the monitor
pub type SharedProcess = Arc<Mutex<Box<dyn BackgroundProcess>>>;

/// Point-in-time replication health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Concurrency-safe holder of the latest [`HealthSnapshot`]
#[derive(Debug, Default)]
pub struct ReplicationHealth {
    state: RwLock<HealthSnapshot>,
}

impl ReplicationHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        *self.state.read().await
    }

    /// Store a check result, returning the new snapshot
    pub async fn record(&self, healthy: bool) -> HealthSnapshot {
        let mut state = self.state.write().await;
        if state.healthy != healthy {
            if healthy {
                tracing::info!("Replication is healthy");
            } else {
                tracing::warn!("Replication is unhealthy, writes will be rejected");
            }
        }
        *state = HealthSnapshot {
            healthy,
            last_checked_at: Some(Utc::now()),
        };
        *state
    }
}

/// Whether `db list` output indicates working replication.
///
/// Plain substring checks: any `error` anywhere fails, and `ok` must
/// appear somewhere. This matches the current litestream output format
/// and will misjudge output that merely mentions those words.
pub fn db_list_is_healthy(output: &str) -> bool {
    !output.contains("error") && output.contains("ok")
}

/// Runs the replication health check and records the result
pub struct ReplicationMonitor {
    runner: Arc<dyn ProcessRunner>,
    cli: LitestreamCli,
    config_path: PathBuf,
    timeout: Duration,
    health: Arc<ReplicationHealth>,
    replicator: Option<SharedProcess>,
}

impl ReplicationMonitor {
    pub fn new(config: &LitestreamConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            cli: LitestreamCli::new(&config.binary),
            config_path: config.config_path.clone(),
            timeout: config.health_check_timeout(),
            health: Arc::new(ReplicationHealth::new()),
            replicator: None,
        }
    }

    /// Also treat an exited replicator as unhealthy
    pub fn with_replicator(mut self, replicator: SharedProcess) -> Self {
        self.replicator = Some(replicator);
        self
    }

    pub fn health(&self) -> &Arc<ReplicationHealth> {
        &self.health
    }

    /// Run one health check now
    pub async fn check(&self) -> HealthSnapshot {
        let healthy = self.evaluate().await;
        self.health.record(healthy).await
    }

    async fn evaluate(&self) -> bool {
        if let Some(replicator) = &self.replicator {
            match replicator.lock().await.try_exited() {
                Ok(Some(report)) => {
                    tracing::error!("Litestream replicator is not running ({})", report);
                    return false;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Could not query replicator status: {}", e);
                    return false;
                }
            }
        }

        if !self.config_path.exists() {
            tracing::warn!(
                "Litestream config {} not found",
                self.config_path.display()
            );
            return false;
        }

        let cmd = self.cli.db_list(&self.config_path);
        match tokio::time::timeout(self.timeout, self.runner.output(&cmd)).await {
            Ok(Ok(out)) if out.success => {
                let healthy = db_list_is_healthy(&out.stdout);
                if healthy {
                    tracing::debug!("Replication health check passed");
                } else {
                    tracing::warn!("Replication health check failed: {}", out.stdout.trim());
                }
                healthy
            }
            Ok(Ok(out)) => {
                tracing::warn!("`{}` failed: {}", cmd, out.failure_reason());
                false
            }
            Ok(Err(e)) => {
                tracing::warn!("Replication health check could not run: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!(
                    "Replication health check timed out after {}s",
                    self.timeout.as_secs()
                );
                false
            }
        }
    }
}
