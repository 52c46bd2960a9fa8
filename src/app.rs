//! Application server (PocketBase) management.

use std::sync::Arc;

use crate::config::{AppConfig, Profile};
use crate::error::Result;
use crate::process::{BackgroundProcess, CommandSpec, ProcessRunner};

/// Environment variable the application reads its encryption key from
pub const ENCRYPTION_ENV: &str = "POCKETBASE_ENCRYPTION_KEY";

/// Launches the application server and its one-off admin commands
pub struct AppServer<'a> {
    config: &'a AppConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl<'a> AppServer<'a> {
    pub fn new(config: &'a AppConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    fn cmd(&self) -> CommandSpec {
        let cmd = CommandSpec::new(&self.config.binary);
        match &self.config.encryption_key {
            Some(key) => cmd.env(ENCRYPTION_ENV, key.as_str()),
            None => cmd,
        }
    }

    /// `serve --http <address>`, with settings encryption when a key is set
    pub fn serve_command(&self, address: &str) -> CommandSpec {
        let cmd = self.cmd().args(["serve", "--http", address]);
        if self.config.encryption_key.is_some() {
            cmd.args(["--encryptionEnv", ENCRYPTION_ENV])
        } else {
            cmd
        }
    }

    /// Single command line for `litestream replicate -exec`
    pub fn serve_command_line(&self, address: &str) -> String {
        let mut line = format!("{} serve --http {}", self.config.binary.display(), address);
        if self.config.encryption_key.is_some() {
            line.push_str(" --encryptionEnv ");
            line.push_str(ENCRYPTION_ENV);
        }
        line
    }

    pub fn superuser_upsert_command(&self) -> CommandSpec {
        self.cmd()
            .args(["superuser", "upsert"])
            .arg(self.config.admin_email.as_str())
            .secret_arg(self.config.admin_password.as_str())
    }

    /// Start the server on its internal address
    pub async fn start(&self) -> Result<Box<dyn BackgroundProcess>> {
        self.runner
            .spawn(&self.serve_command(&self.config.http_address))
            .await
    }

    /// Create or update the admin account in the docker profile.
    ///
    /// Failure leaves the server running without a provisioned admin.
    /// Returns whether an account was upserted.
    pub async fn upsert_superuser(&self) -> bool {
        if self.config.profile != Profile::Docker {
            return false;
        }

        let cmd = self.superuser_upsert_command();
        match self.runner.output(&cmd).await {
            Ok(out) if out.success => {
                tracing::info!("Superuser {} is provisioned", self.config.admin_email);
                true
            }
            Ok(out) => {
                tracing::warn!("Superuser upsert failed: {}", out.failure_reason());
                false
            }
            Err(e) => {
                tracing::warn!("Superuser upsert failed: {}", e);
                false
            }
        }
    }

    /// Replace this process with the server listening on `address`
    pub fn exec_serve(&self, address: &str) -> crate::error::Error {
        self.runner.exec(&self.serve_command(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::{Event, FakeRunner};
    use crate::process::CommandOutput;

    fn docker() -> AppConfig {
        AppConfig {
            profile: Profile::Docker,
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_serve_command() {
        let config = AppConfig::default();
        let app = AppServer::new(&config, Arc::new(FakeRunner::succeeding()));
        let cmd = app.serve_command("127.0.0.1:8091");
        assert_eq!(cmd.to_string(), "pocketbase serve --http 127.0.0.1:8091");
        assert!(cmd.get_envs().is_empty());
    }

    #[test]
    fn test_encryption_key_passed_by_env() {
        let config = AppConfig {
            encryption_key: Some("00112233445566778899aabbccddeeff".into()),
            ..AppConfig::default()
        };
        let app = AppServer::new(&config, Arc::new(FakeRunner::succeeding()));
        let cmd = app.serve_command("0.0.0.0:8090");

        assert!(cmd.to_string().ends_with("--encryptionEnv POCKETBASE_ENCRYPTION_KEY"));
        assert!(!cmd.to_string().contains("0011223344"));
        assert_eq!(cmd.get_envs()[0].0, ENCRYPTION_ENV);
        assert_eq!(
            app.serve_command_line("0.0.0.0:8090"),
            "/pocketbase serve --http 0.0.0.0:8090 --encryptionEnv POCKETBASE_ENCRYPTION_KEY"
        );
    }

    #[tokio::test]
    async fn test_upsert_only_in_docker_profile() {
        let config = AppConfig::default();
        let runner = FakeRunner::succeeding();
        let journal = runner.journal();
        let app = AppServer::new(&config, Arc::new(runner));

        assert!(!app.upsert_superuser().await);
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_masks_password() {
        let config = docker();
        let runner = FakeRunner::succeeding();
        let journal = runner.journal();
        let app = AppServer::new(&config, Arc::new(runner));

        assert!(app.upsert_superuser().await);
        assert_eq!(journal.commands(), vec!["superuser upsert admin@example.com admin123"]);
        assert_eq!(
            app.superuser_upsert_command().to_string(),
            "pocketbase superuser upsert admin@example.com ****"
        );
    }

    #[tokio::test]
    async fn test_upsert_failure_is_degraded() {
        let config = docker();
        let app = AppServer::new(
            &config,
            Arc::new(FakeRunner::new(|_| CommandOutput::failed(1, "db locked"))),
        );
        assert!(!app.upsert_superuser().await);
    }

    #[tokio::test]
    async fn test_start_and_exec() {
        let config = AppConfig::default();
        let runner = FakeRunner::succeeding();
        let journal = runner.journal();
        let app = AppServer::new(&config, Arc::new(runner));

        app.start().await.unwrap();
        app.exec_serve("0.0.0.0:8090");
        assert_eq!(
            journal.events(),
            vec![
                Event::Spawn("serve --http 127.0.0.1:8091".into()),
                Event::Exec("serve --http 0.0.0.0:8090".into()),
            ]
        );
    }
}
