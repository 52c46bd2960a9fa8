//! Replication supervisor.
//!
//! Brings the database under continuous replication: write the config,
//! restore a missing database from its replica, sanity-check it, start
//! `litestream replicate` and schedule the steady-state maintenance tasks.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::cli::LitestreamCli;
use super::config::{self, WriteOutcome};
use crate::config::LitestreamConfig;
use crate::error::{Error, Result};
use crate::health::{ReplicationMonitor, SharedProcess};
use crate::process::ProcessRunner;
use crate::sqlite;
use crate::tasks::spawn_recurring;

/// What the restore step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The database already existed
    NotNeeded,
    /// Restore ran (it is a no-op when no replica exists yet)
    Attempted,
    /// Restore failed; startup continues with an empty database
    Failed,
}

/// Handles of the recurring maintenance tasks
pub struct SteadyState {
    pub checkpoint: JoinHandle<()>,
    pub health: JoinHandle<()>,
}

impl SteadyState {
    pub fn abort(&self) {
        self.checkpoint.abort();
        self.health.abort();
    }
}

/// Drives a database from cold start to continuous replication
pub struct ReplicationSupervisor<'a> {
    config: &'a LitestreamConfig,
    runner: Arc<dyn ProcessRunner>,
    cli: LitestreamCli,
}

impl<'a> ReplicationSupervisor<'a> {
    pub fn new(config: &'a LitestreamConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            config,
            runner,
            cli: LitestreamCli::new(&config.binary),
        }
    }

    /// Run every startup step and return the running replicator
    pub async fn start(&self) -> Result<SharedProcess> {
        self.synthesize_config()?;
        self.restore_if_missing().await;
        self.check_integrity().await;
        self.start_replication().await
    }

    pub fn synthesize_config(&self) -> Result<WriteOutcome> {
        config::synthesize(self.config)
    }

    /// Restore the database from its replica when the file is missing
    pub async fn restore_if_missing(&self) -> RestoreOutcome {
        let db_path = &self.config.db_path;
        if db_path.exists() {
            tracing::info!("Database {} exists, skipping restore", db_path.display());
            return RestoreOutcome::NotNeeded;
        }

        if let Some(parent) = db_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Could not create {}: {}", parent.display(), e);
            }
        }

        tracing::info!("Database {} not found, restoring from replica", db_path.display());
        let cmd = self.cli.restore(&self.config.config_path, db_path);
        match self.runner.run(&cmd).await {
            Ok(out) if out.success => {
                if db_path.exists() {
                    tracing::info!("Restored {}", db_path.display());
                } else {
                    tracing::info!("No replica found, starting with a fresh database");
                }
                RestoreOutcome::Attempted
            }
            Ok(out) => {
                tracing::warn!("Restore failed ({}), continuing", out.failure_reason());
                RestoreOutcome::Failed
            }
            Err(e) => {
                tracing::warn!("Restore failed ({}), continuing", e);
                RestoreOutcome::Failed
            }
        }
    }

    /// Log the result of `PRAGMA integrity_check`; never fatal
    pub async fn check_integrity(&self) {
        let db_path = self.config.db_path.clone();
        if !db_path.exists() {
            return;
        }
        match sqlite::integrity_check_async(db_path.clone()).await {
            Ok(()) => tracing::info!("Integrity check passed for {}", db_path.display()),
            Err(e) => tracing::error!("Integrity check failed for {}: {}", db_path.display(), e),
        }
    }

    /// Start `litestream replicate` in the background
    pub async fn start_replication(&self) -> Result<SharedProcess> {
        let cmd = self.cli.replicate(&self.config.config_path, None);
        let process = self
            .runner
            .spawn(&cmd)
            .await
            .map_err(|e| Error::Replication(format!("failed to start replication: {}", e)))?;
        tracing::info!("Replication started for {}", self.config.db_path.display());
        Ok(Arc::new(Mutex::new(process)))
    }

    /// Replace this process with `litestream replicate -exec <child>`.
    ///
    /// Litestream then owns the application server's lifetime.
    pub fn replicate_and_exec(&self, child: &str) -> Error {
        let cmd = self.cli.replicate(&self.config.config_path, Some(child));
        self.runner.exec(&cmd)
    }

    /// Schedule periodic checkpointing and health checking
    pub fn spawn_steady_state(&self, monitor: Arc<ReplicationMonitor>) -> SteadyState {
        let db_path = self.config.db_path.clone();
        let checkpoint = spawn_recurring(
            "checkpoint",
            self.config.force_checkpoint_interval(),
            move || {
                let db_path = db_path.clone();
                async move {
                    match sqlite::checkpoint_async(db_path).await {
                        Ok(Some(result)) if result.busy => {
                            tracing::debug!("Checkpoint could not complete, database busy")
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Periodic checkpoint failed: {}", e),
                    }
                }
            },
        );

        let health = spawn_recurring(
            "replication-health",
            self.config.health_check_interval(),
            move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    monitor.check().await;
                }
            },
        );

        SteadyState { checkpoint, health }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::{Event, FakeRunner};
    use crate::process::CommandOutput;
    use std::path::PathBuf;
    use std::time::Duration;

    fn config(dir: &tempfile::TempDir) -> LitestreamConfig {
        LitestreamConfig {
            binary: PathBuf::from("/litestream"),
            config_path: dir.path().join("litestream.yml"),
            db_path: dir.path().join("pb_data/data.db"),
            backup_path: Some(dir.path().join("backups")),
            ..LitestreamConfig::default()
        }
    }

    #[tokio::test]
    async fn test_restore_runs_before_replicate() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let runner = FakeRunner::succeeding();
        let journal = runner.journal();
        let supervisor = ReplicationSupervisor::new(&config, Arc::new(runner));

        supervisor.start().await.unwrap();

        let events = journal.events();
        let restore = events
            .iter()
            .position(|e| matches!(e, Event::Run(l) if l.starts_with("restore -if-replica-exists")))
            .expect("restore ran");
        let replicate = events
            .iter()
            .position(|e| matches!(e, Event::Spawn(l) if l.starts_with("replicate -config")))
            .expect("replicate spawned");
        assert!(restore < replicate);
        assert!(config.config_path.exists());
    }

    #[tokio::test]
    async fn test_existing_database_skips_restore() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(config.db_path.parent().unwrap()).unwrap();
        rusqlite::Connection::open(&config.db_path)
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER);")
            .unwrap();

        let runner = FakeRunner::succeeding();
        let journal = runner.journal();
        let supervisor = ReplicationSupervisor::new(&config, Arc::new(runner));

        assert_eq!(supervisor.restore_if_missing().await, RestoreOutcome::NotNeeded);
        supervisor.start().await.unwrap();
        assert_eq!(journal.count("restore"), 0);
        assert_eq!(journal.events().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let runner = FakeRunner::new(|args| {
            if args[0] == "restore" {
                CommandOutput::failed(1, "replica unreachable")
            } else {
                CommandOutput::ok("")
            }
        });
        let journal = runner.journal();
        let supervisor = ReplicationSupervisor::new(&config, Arc::new(runner));

        assert_eq!(supervisor.restore_if_missing().await, RestoreOutcome::Failed);
        supervisor.start().await.unwrap();
        assert!(journal
            .events()
            .iter()
            .any(|e| matches!(e, Event::Spawn(l) if l.starts_with("replicate"))));
    }

    #[tokio::test]
    async fn test_corrupt_database_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(config.db_path.parent().unwrap()).unwrap();
        std::fs::write(&config.db_path, vec![0x42; 4096]).unwrap();

        let supervisor = ReplicationSupervisor::new(&config, Arc::new(FakeRunner::succeeding()));
        assert!(supervisor.start().await.is_ok());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let supervisor =
            ReplicationSupervisor::new(&config, Arc::new(FakeRunner::succeeding().spawn_fails()));

        assert!(matches!(supervisor.start().await, Err(Error::Replication(_))));
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_fatal_before_any_command() {
        let dir = tempfile::tempdir().unwrap();
        let config = LitestreamConfig {
            backup_path: None,
            ..config(&dir)
        };
        let runner = FakeRunner::succeeding();
        let journal = runner.journal();
        let supervisor = ReplicationSupervisor::new(&config, Arc::new(runner));

        assert!(matches!(supervisor.start().await, Err(Error::Config(_))));
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_replicate_and_exec() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let runner = FakeRunner::succeeding();
        let journal = runner.journal();
        let supervisor = ReplicationSupervisor::new(&config, Arc::new(runner));

        let err = supervisor.replicate_and_exec("/pocketbase serve --http 0.0.0.0:8090");
        assert!(matches!(err, Error::Handoff { .. }));
        match &journal.events()[..] {
            [Event::Exec(line)] => {
                assert!(line.ends_with("-exec /pocketbase serve --http 0.0.0.0:8090"))
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_state_checks_health_periodically() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        std::fs::write(&config.config_path, "dbs: []\n").unwrap();
        let runner: Arc<dyn ProcessRunner> = {
            let fake = FakeRunner::new(|_| CommandOutput::ok("data.db ok"));
            Arc::new(fake)
        };
        let monitor = Arc::new(ReplicationMonitor::new(&config, Arc::clone(&runner)));
        let supervisor = ReplicationSupervisor::new(&config, runner);

        let tasks = supervisor.spawn_steady_state(Arc::clone(&monitor));
        assert!(monitor.health().snapshot().await.last_checked_at.is_none());

        tokio::time::sleep(config.health_check_interval() + Duration::from_secs(1)).await;
        assert!(monitor.health().snapshot().await.healthy);
        tasks.abort();
    }

    /// Yield to the runtime while blocking-pool work finishes
    async fn settle_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            tokio::task::yield_now().await;
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_state_checkpoints_and_survives_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = LitestreamConfig {
            force_checkpoint_secs: 10,
            health_check_interval_secs: 3600,
            ..config(&dir)
        };
        std::fs::create_dir_all(config.db_path.parent().unwrap()).unwrap();
        // Not a database: the first checkpoint fails
        std::fs::write(&config.db_path, vec![0x13; 4096]).unwrap();

        let runner: Arc<dyn ProcessRunner> = Arc::new(FakeRunner::succeeding());
        let monitor = Arc::new(ReplicationMonitor::new(&config, Arc::clone(&runner)));
        let supervisor = ReplicationSupervisor::new(&config, runner);
        let tasks = supervisor.spawn_steady_state(monitor);

        tokio::time::advance(Duration::from_secs(11)).await;
        settle_until(|| false).await;
        assert!(!tasks.checkpoint.is_finished());

        // Swap in a WAL database whose frames have not reached the main file
        std::fs::remove_file(&config.db_path).unwrap();
        let writer = rusqlite::Connection::open(&config.db_path).unwrap();
        writer
            .execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA wal_autocheckpoint=0;
                 CREATE TABLE notes (body BLOB);",
            )
            .unwrap();
        for _ in 0..64 {
            writer
                .execute("INSERT INTO notes (body) VALUES (zeroblob(1024))", [])
                .unwrap();
        }
        let db_size = || std::fs::metadata(&config.db_path).unwrap().len();
        let before = db_size();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(settle_until(|| db_size() > before).await);
        assert!(!tasks.checkpoint.is_finished());

        tasks.abort();
        drop(writer);
    }
}
