//! Garage Bootstrap Sequencer
//!
//! Provisions a freshly started single-node Garage cluster: node layout,
//! access key, buckets and bucket permissions. The sequence runs at most
//! once per container lifetime, gated on the marker file. A temporary
//! background `garage server` answers the CLI while provisioning and is
//! always stopped before the sequence returns, whether it succeeded or
//! not.

use crate::config::GarageConfig;
use crate::error::{BootstrapStep, Error, Result};
use crate::process::{BackgroundProcess, CommandOutput, CommandSpec, ProcessRunner, StatusPoller};

use super::cli::GarageCli;
use super::parse::{listing_contains, parse_node_id};

/// Result of [`Bootstrapper::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Marker file present; nothing was done
    AlreadyInitialized,
    /// Sequence ran to completion and the marker was written
    Completed(BootstrapReport),
}

/// What a completed bootstrap did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub node_id: String,
    /// `false` when `layout apply` failed and was tolerated
    pub layout_applied: bool,
    pub key_imported: bool,
    pub buckets_created: Vec<String>,
}

/// Drives the bootstrap state machine against a garage CLI
pub struct Bootstrapper<'a> {
    config: &'a GarageConfig,
    runner: &'a dyn ProcessRunner,
    cli: GarageCli,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(config: &'a GarageConfig, runner: &'a dyn ProcessRunner) -> Self {
        Self {
            config,
            runner,
            cli: GarageCli::new(&config.binary),
        }
    }

    /// Run the bootstrap sequence unless the marker file already exists
    pub async fn run(&self) -> Result<BootstrapOutcome> {
        if self.config.marker_path.exists() {
            tracing::info!(
                "Garage already initialized ({} present), skipping bootstrap",
                self.config.marker_path.display()
            );
            return Ok(BootstrapOutcome::AlreadyInitialized);
        }
        self.config.validate()?;

        tracing::info!("Initializing Garage...");
        let mut server = self
            .runner
            .spawn(&self.cli.server())
            .await
            .map_err(|e| Error::bootstrap(BootstrapStep::ServerStarting, e))?;

        let result = self.provision(server.as_mut()).await;
        self.stop_server(server.as_mut()).await;

        let report = result?;
        tracing::info!("Initialization complete");
        Ok(BootstrapOutcome::Completed(report))
    }

    /// Replace this process with the long-running garage server.
    ///
    /// Only returns if the replacement failed.
    pub fn handoff(&self) -> Error {
        tracing::info!("Starting Garage server...");
        let err = self.runner.exec(&self.cli.server());
        Error::bootstrap(BootstrapStep::Handoff, err)
    }

    async fn provision(&self, server: &mut dyn BackgroundProcess) -> Result<BootstrapReport> {
        self.wait_ready(server).await?;
        let node_id = self.resolve_identity().await?;
        self.assign_layout(&node_id).await?;
        let layout_applied = self.apply_layout().await;
        let key_imported = self.ensure_key().await?;
        let buckets_created = self.ensure_buckets().await?;
        self.grant_permissions().await?;
        self.finalize()?;

        Ok(BootstrapReport {
            node_id,
            layout_applied,
            key_imported,
            buckets_created,
        })
    }

    async fn stop_server(&self, server: &mut dyn BackgroundProcess) {
        match server.terminate().await {
            Ok(report) => tracing::info!("Bootstrap server stopped ({})", report),
            Err(e) => tracing::warn!("Failed to stop bootstrap server {}: {}", server.label(), e),
        }
    }

    async fn wait_ready(&self, server: &mut dyn BackgroundProcess) -> Result<()> {
        tracing::info!("Waiting for Garage server to start...");
        let attempts = StatusPoller::new(self.config.ready_interval())
            .with_timeout(self.config.ready_timeout())
            .wait_ready(self.runner, &self.cli.status(), server)
            .await
            .map_err(|e| Error::bootstrap(BootstrapStep::WaitingReady, e))?;
        tracing::info!(attempts, "Garage server is ready");
        Ok(())
    }

    async fn resolve_identity(&self) -> Result<String> {
        let out = self
            .attempt(&self.cli.node_id())
            .await
            .map_err(|reason| Error::bootstrap(BootstrapStep::IdentityResolved, reason))?;

        let node_id = parse_node_id(&out.stdout).ok_or_else(|| {
            Error::bootstrap(BootstrapStep::IdentityResolved, "no node id in `garage node id` output")
        })?;
        tracing::info!(node_id = %node_id, "Resolved node identity");
        Ok(node_id)
    }

    async fn assign_layout(&self, node_id: &str) -> Result<()> {
        tracing::info!(zone = %self.config.zone, capacity = %self.config.capacity, "Setting up cluster layout...");
        let cmd = self
            .cli
            .layout_assign(&self.config.zone, &self.config.capacity, node_id);
        if let Err(reason) = self.attempt(&cmd).await {
            tracing::error!("Error assigning role: {}", reason);
            self.log_help(&["layout", "assign"]).await;
            return Err(Error::bootstrap(BootstrapStep::LayoutAssigned, reason));
        }
        Ok(())
    }

    /// Best-effort: a cluster that is assigned but not applied is tolerated
    async fn apply_layout(&self) -> bool {
        let cmd = self.cli.layout_apply(&self.config.layout_version);
        match self.attempt(&cmd).await {
            Ok(_) => {
                tracing::info!(version = %self.config.layout_version, "Cluster layout configured");
                true
            }
            Err(reason) => {
                tracing::warn!("Error applying layout: {}", reason);
                match self.attempt(&self.cli.layout_show()).await {
                    Ok(show) => tracing::info!("Current layout status:\n{}", show.stdout),
                    Err(e) => tracing::warn!("Could not show layout: {}", e),
                }
                tracing::warn!("Continuing with initialization despite layout apply failure");
                false
            }
        }
    }

    async fn ensure_key(&self) -> Result<bool> {
        let access_key = &self.config.access_key;
        tracing::info!(
            access_key = %access_key,
            secret_len = self.config.secret_key.len(),
            "Ensuring access key"
        );

        let listing = match self.attempt(&self.cli.key_list()).await {
            Ok(out) => out.stdout,
            Err(reason) => {
                tracing::error!("Error listing keys: {}", reason);
                self.log_help(&["key"]).await;
                return Err(Error::bootstrap(BootstrapStep::KeyEnsured, reason));
            }
        };

        if listing_contains(&listing, access_key) {
            tracing::info!("Key already exists, skipping import");
            return Ok(false);
        }

        let import = self.cli.key_import(
            access_key,
            &self.config.secret_key,
            self.config.key_import_yes,
        );
        let Err(reason) = self.attempt(&import).await else {
            tracing::info!("Key imported");
            return Ok(true);
        };

        tracing::warn!("Error importing key: {}", reason);
        self.log_help(&["key", "import"]).await;
        tracing::info!("Import command failed, checking whether the key was imported anyway...");
        match self.attempt(&self.cli.key_list()).await {
            Ok(out) if listing_contains(&out.stdout, access_key) => {
                tracing::info!("Key was imported successfully despite error");
                Ok(true)
            }
            _ => Err(Error::bootstrap(BootstrapStep::KeyEnsured, reason)),
        }
    }

    async fn ensure_buckets(&self) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for bucket in &self.config.buckets {
            let listing = match self.attempt(&self.cli.bucket_list()).await {
                Ok(out) => out.stdout,
                Err(reason) => {
                    tracing::error!("Error listing buckets: {}", reason);
                    self.log_help(&["bucket"]).await;
                    return Err(Error::bootstrap(BootstrapStep::BucketsEnsured, reason));
                }
            };

            if listing_contains(&listing, bucket) {
                tracing::info!(bucket = %bucket, "Bucket already exists, skipping create");
                continue;
            }

            if let Err(reason) = self.attempt(&self.cli.bucket_create(bucket)).await {
                tracing::error!(bucket = %bucket, "Error creating bucket: {}", reason);
                self.log_help(&["bucket", "create"]).await;
                return Err(Error::bootstrap(
                    BootstrapStep::BucketsEnsured,
                    format!("{}: {}", bucket, reason),
                ));
            }
            tracing::info!(bucket = %bucket, "Bucket created");
            created.push(bucket.clone());
        }
        Ok(created)
    }

    /// Grants are re-applied on every run; `bucket allow` is not checked first
    async fn grant_permissions(&self) -> Result<()> {
        for bucket in &self.config.buckets {
            let cmd = self
                .cli
                .bucket_allow(bucket, &self.config.access_key, self.config.permissions);
            if let Err(reason) = self.attempt(&cmd).await {
                tracing::error!(bucket = %bucket, "Error allowing access to bucket: {}", reason);
                self.log_help(&["bucket", "allow"]).await;
                return Err(Error::bootstrap(
                    BootstrapStep::PermissionsGranted,
                    format!("{}: {}", bucket, reason),
                ));
            }
            tracing::info!(
                bucket = %bucket,
                read = self.config.permissions.read,
                write = self.config.permissions.write,
                owner = self.config.permissions.owner,
                "Bucket access granted"
            );
        }
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        let marker = &self.config.marker_path;
        let create = || -> std::io::Result<()> {
            if let Some(parent) = marker.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(marker)?;
            Ok(())
        };
        create().map_err(|e| {
            Error::bootstrap(
                BootstrapStep::Finalized,
                format!("cannot create {}: {}", marker.display(), e),
            )
        })
    }

    /// Run a command, folding launch errors and non-zero exits into one reason
    async fn attempt(&self, cmd: &CommandSpec) -> std::result::Result<CommandOutput, String> {
        match self.runner.output(cmd).await {
            Ok(out) if out.success => Ok(out),
            Ok(out) => Err(format!("`{}` failed with {}", cmd, out.failure_reason())),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Log `garage <subcommand> --help` to aid diagnosis of a failed step
    async fn log_help(&self, subcommand: &[&str]) {
        if let Ok(out) = self.attempt(&self.cli.help(subcommand)).await {
            tracing::info!("garage {} --help:\n{}", subcommand.join(" "), out.stdout);
        }
    }
}
