//! Process Control Module
//!
//! Launching, supervising and replacing external daemon processes.
//! Everything that touches a child process goes through the
//! [`ProcessRunner`] and [`BackgroundProcess`] traits so the bootstrap and
//! replication pipelines can be driven by a scripted collaborator in tests.

mod poll;
mod system;

#[cfg(test)]
pub(crate) mod fake;

pub use poll::StatusPoller;
pub use system::{ChildProcess, SystemRunner};

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A program invocation: binary plus arguments.
///
/// Arguments added with [`CommandSpec::secret_arg`] are masked when the
/// command is displayed, so specs can be logged freely.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<String>,
    secret: Vec<usize>,
    envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append an argument that must never appear in logs
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for the child (never displayed)
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Short program name for log fields
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret.contains(&i) {
                f.write_str(" ****")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandSpec({})", self)
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful run with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed run with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Human-readable failure description
    pub fn failure_reason(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            status
        } else {
            format!("{}: {}", status, stderr)
        }
    }

    /// Turn an unsuccessful run into [`Error::CommandFailed`]
    pub fn into_result(self, command: &CommandSpec) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::CommandFailed {
                command: command.to_string(),
                reason: self.failure_reason(),
            })
        }
    }
}

/// How a background process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub success: bool,
    pub code: Option<i32>,
}

impl From<std::process::ExitStatus> for ExitReport {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Launches external commands.
#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, capturing stdout and stderr.
    ///
    /// `Err` means the program could not be launched at all; a non-zero
    /// exit is reported through [`CommandOutput::success`].
    async fn output(&self, command: &CommandSpec) -> Result<CommandOutput>;

    /// Run to completion with stdout and stderr passed through to ours
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        self.output(command).await
    }

    /// Start a long-running process in the background
    async fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn BackgroundProcess>>;

    /// Replace the current process image with `command`.
    ///
    /// Returns only if the replacement failed; nothing runs after a
    /// successful handoff.
    fn exec(&self, command: &CommandSpec) -> Error;
}

/// Handle to a process started with [`ProcessRunner::spawn`]
#[async_trait::async_trait]
pub trait BackgroundProcess: Send {
    /// Command line the process was started with (secrets masked)
    fn label(&self) -> &str;

    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check
    fn try_exited(&mut self) -> Result<Option<ExitReport>>;

    /// Block until the process exits on its own
    async fn wait(&mut self) -> Result<ExitReport>;

    /// Ask the process to stop, escalate if it lingers, and wait for exit
    async fn terminate(&mut self) -> Result<ExitReport>;
}
