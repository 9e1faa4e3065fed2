//! Probes for the monitored workload container.

use std::future::Future;
use std::pin::Pin;
use std::process::{Output, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Boxed future returned by probe traits.
pub type ProbeFuture<'a, T, E = ActivityError> =
    Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Default Docker CLI program.
pub const DEFAULT_DOCKER_BIN: &str = "docker";

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while probing the workload.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ActivityError {
    /// The probe command could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error message.
        message: String,
    },
    /// The probe command exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        /// Program that failed.
        program: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The probe command did not finish in time.
    #[error("{program} timed out after {seconds}s")]
    Timeout {
        /// Program that timed out.
        program: String,
        /// Timeout in seconds.
        seconds: u64,
    },
}

/// Observes whether the workload runs and what it printed recently.
pub trait ActivitySource: Send + Sync {
    /// Returns `false` once the workload process no longer runs.
    fn is_running(&self) -> ProbeFuture<'_, bool>;

    /// Returns workload output printed during the last `since`, keeping at
    /// most the newest `lines` lines.
    fn recent_output(&self, since: Duration, lines: usize) -> ProbeFuture<'_, String>;
}

/// [`ActivitySource`] backed by the Docker CLI.
#[derive(Clone, Debug)]
pub struct DockerActivitySource {
    program: String,
    container: String,
}

impl DockerActivitySource {
    /// Probes `container` with the default `docker` binary.
    #[must_use]
    pub fn new(container: impl Into<String>) -> Self {
        Self::with_program(DEFAULT_DOCKER_BIN, container)
    }

    /// Probes `container` with an explicit Docker-compatible binary.
    #[must_use]
    pub fn with_program(program: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            container: container.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output, ActivityError> {
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(PROBE_TIMEOUT, child).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(ActivityError::Spawn {
                program: self.program.clone(),
                message: err.to_string(),
            }),
            Err(_) => Err(ActivityError::Timeout {
                program: self.program.clone(),
                seconds: PROBE_TIMEOUT.as_secs(),
            }),
        }
    }

    fn failure(&self, output: &Output) -> ActivityError {
        ActivityError::Failed {
            program: self.program.clone(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        }
    }
}

/// Interprets `docker inspect` output; a missing container is not running.
pub(crate) fn parse_running(output: &Output) -> Option<bool> {
    if output.status.success() {
        return Some(String::from_utf8_lossy(&output.stdout).trim() == "true");
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("No such object") || stderr.contains("No such container") {
        return Some(false);
    }
    None
}

/// Relative `docker logs --since` value, rounded up to whole seconds.
pub(crate) fn since_argument(since: Duration) -> String {
    let secs = since.as_secs() + u64::from(since.subsec_nanos() > 0);
    format!("{}s", secs.max(1))
}

impl ActivitySource for DockerActivitySource {
    fn is_running(&self) -> ProbeFuture<'_, bool> {
        Box::pin(async move {
            let output = self
                .run(&[
                    "inspect",
                    "--format",
                    "{{.State.Running}}",
                    self.container.as_str(),
                ])
                .await?;
            parse_running(&output).ok_or_else(|| self.failure(&output))
        })
    }

    fn recent_output(&self, since: Duration, lines: usize) -> ProbeFuture<'_, String> {
        Box::pin(async move {
            let since_arg = since_argument(since);
            let tail = lines.to_string();
            let output = self
                .run(&[
                    "logs",
                    "--since",
                    since_arg.as_str(),
                    "--tail",
                    tail.as_str(),
                    self.container.as_str(),
                ])
                .await?;
            if !output.status.success() {
                return Err(self.failure(&output));
            }
            let mut window = String::from_utf8_lossy(&output.stdout).into_owned();
            window.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(window)
        })
    }
}
