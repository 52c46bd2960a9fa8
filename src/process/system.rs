//! Real process control on top of `tokio::process`.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use super::{BackgroundProcess, CommandOutput, CommandSpec, ExitReport, ProcessRunner};
use crate::error::{Error, Result};

/// Runs commands as real child processes
#[derive(Debug, Clone)]
pub struct SystemRunner {
    stop_grace: Duration,
}

impl SystemRunner {
    /// `stop_grace` bounds the wait between SIGTERM and SIGKILL
    pub fn new(stop_grace: Duration) -> Self {
        Self { stop_grace }
    }

    /// Children are killed when their future or handle is dropped, so a
    /// caller that times out does not leave the process behind.
    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(spec.program());
        cmd.args(spec.get_args())
            .envs(spec.get_envs().iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait::async_trait]
impl ProcessRunner for SystemRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!("Running {}", spec);
        let output = Self::command(spec)
            .output()
            .await
            .map_err(|source| Error::Launch {
                program: spec.program().to_path_buf(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!("Running {} (inherited stdio)", spec);
        let status = Self::command(spec)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| Error::Launch {
                program: spec.program().to_path_buf(),
                source,
            })?;

        Ok(CommandOutput {
            success: status.success(),
            code: status.code(),
            ..CommandOutput::default()
        })
    }

    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn BackgroundProcess>> {
        let child = Self::command(spec)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| Error::Launch {
                program: spec.program().to_path_buf(),
                source,
            })?;

        tracing::info!(pid = ?child.id(), "Started {} in background", spec);
        Ok(Box::new(ChildProcess {
            child,
            label: spec.to_string(),
            grace: self.stop_grace,
        }))
    }

    #[cfg(unix)]
    fn exec(&self, spec: &CommandSpec) -> Error {
        use std::os::unix::process::CommandExt;

        tracing::info!("Handing off to {}", spec);
        let source = std::process::Command::new(spec.program())
            .args(spec.get_args())
            .envs(spec.get_envs().iter().map(|(k, v)| (k, v)))
            .exec();
        Error::Handoff {
            program: spec.program().to_path_buf(),
            source,
        }
    }

    /// Without process replacement, run the server in the foreground and
    /// mirror its exit status.
    #[cfg(not(unix))]
    fn exec(&self, spec: &CommandSpec) -> Error {
        tracing::info!("Handing off to {} (spawn and wait)", spec);
        match std::process::Command::new(spec.program())
            .args(spec.get_args())
            .envs(spec.get_envs().iter().map(|(k, v)| (k, v)))
            .status()
        {
            Ok(status) => std::process::exit(status.code().unwrap_or(1)),
            Err(source) => Error::Handoff {
                program: spec.program().to_path_buf(),
                source,
            },
        }
    }
}

/// A background child process
pub struct ChildProcess {
    child: Child,
    label: String,
    grace: Duration,
}

impl ChildProcess {
    #[cfg(unix)]
    fn request_stop(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!(pid, "SIGTERM failed ({}), killing {}", e, self.label);
            let _ = self.child.start_kill();
        }
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) {
        let _ = self.child.start_kill();
    }
}

#[async_trait::async_trait]
impl BackgroundProcess for ChildProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exited(&mut self) -> Result<Option<ExitReport>> {
        Ok(self.child.try_wait()?.map(ExitReport::from))
    }

    async fn wait(&mut self) -> Result<ExitReport> {
        Ok(self.child.wait().await?.into())
    }

    async fn terminate(&mut self) -> Result<ExitReport> {
        if let Some(report) = self.try_exited()? {
            return Ok(report);
        }

        self.request_stop();
        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(status) => Ok(status?.into()),
            Err(_) => {
                tracing::warn!(
                    "{} still running {}s after SIGTERM, killing",
                    self.label,
                    self.grace.as_secs()
                );
                self.child.kill().await?;
                Ok(self.child.wait().await?.into())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_captures_stdout() {
        let runner = SystemRunner::default();
        let out = runner
            .output(&CommandSpec::new("sh").args(["-c", "echo hello; exit 3"]))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let runner = SystemRunner::default();
        let err = runner
            .output(&CommandSpec::new("/nonexistent/pocketstream-test-binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropped_output_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let runner = SystemRunner::default();
        let spec = CommandSpec::new("sh").arg("-c").arg(format!(
            "echo $$ > {}; exec sleep 30",
            pid_file.display()
        ));

        let timed_out = tokio::time::timeout(Duration::from_millis(500), runner.output(&spec)).await;
        assert!(timed_out.is_err());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let stat = format!("/proc/{}/stat", pid.trim());
        let mut running = true;
        for _ in 0..50 {
            running = std::fs::read_to_string(&stat)
                .map(|line| {
                    line.rsplit(')')
                        .next()
                        .is_some_and(|rest| !rest.trim_start().starts_with('Z'))
                })
                .unwrap_or(false);
            if !running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!running);
    }

    #[tokio::test]
    async fn test_terminate_stops_background_process() {
        let runner = SystemRunner::new(Duration::from_secs(5));
        let mut process = runner
            .spawn(&CommandSpec::new("sleep").arg("30"))
            .await
            .unwrap();
        assert!(process.try_exited().unwrap().is_none());

        let report = process.terminate().await.unwrap();
        assert!(!report.success);
        assert!(process.try_exited().unwrap().is_some());
    }
}
