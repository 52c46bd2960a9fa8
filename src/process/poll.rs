//! Readiness polling with a fixed interval.

use std::time::{Duration, Instant};

use super::{BackgroundProcess, CommandSpec, ProcessRunner};
use crate::error::{Error, Result};

/// Repeats a probe command until it succeeds.
///
/// There is no backoff and, unless [`StatusPoller::with_timeout`] is used,
/// no upper bound. Polling stops early when the supervised process exits,
/// since nothing will ever answer the probe after that.
#[derive(Debug, Clone, Copy)]
pub struct StatusPoller {
    interval: Duration,
    timeout: Option<Duration>,
}

impl StatusPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Poll `probe` until it exits successfully; returns the attempt count
    pub async fn wait_ready(
        &self,
        runner: &dyn ProcessRunner,
        probe: &CommandSpec,
        process: &mut dyn BackgroundProcess,
    ) -> Result<u32> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match runner.output(probe).await {
                Ok(out) if out.success => return Ok(attempts),
                Ok(out) => tracing::debug!(attempts, "{} not ready: {}", probe, out.failure_reason()),
                Err(e) => tracing::debug!(attempts, "{} not ready: {}", probe, e),
            }

            if let Some(report) = process.try_exited()? {
                return Err(Error::ProcessExited(format!("{} ({})", process.label(), report)));
            }

            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    return Err(Error::ReadyTimeout(attempts));
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeRunner;
    use crate::process::CommandOutput;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn poller() -> StatusPoller {
        StatusPoller::new(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_polls_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let runner = FakeRunner::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                CommandOutput::failed(1, "connection refused")
            } else {
                CommandOutput::ok("healthy")
            }
        });
        let mut server = runner.spawn(&CommandSpec::new("garage").arg("server")).await.unwrap();

        let attempts = poller()
            .wait_ready(&runner, &CommandSpec::new("garage").arg("status"), server.as_mut())
            .await
            .unwrap();
        assert_eq!(attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stops_when_process_exits() {
        let runner = FakeRunner::new(|_| CommandOutput::failed(1, "down")).exits_immediately();
        let mut server = runner.spawn(&CommandSpec::new("garage").arg("server")).await.unwrap();

        let err = poller()
            .wait_ready(&runner, &CommandSpec::new("garage").arg("status"), server.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProcessExited(_)));
    }

    #[tokio::test]
    async fn test_bounded_timeout() {
        let runner = FakeRunner::new(|_| CommandOutput::failed(1, "down"));
        let mut server = runner.spawn(&CommandSpec::new("garage").arg("server")).await.unwrap();

        let err = poller()
            .with_timeout(Some(Duration::from_millis(20)))
            .wait_ready(&runner, &CommandSpec::new("garage").arg("status"), server.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadyTimeout(n) if n >= 1));
    }
}
