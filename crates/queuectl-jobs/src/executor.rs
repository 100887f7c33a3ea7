//! Executor adapter: runs a job's command and reports how it went.
//!
//! A failed command is not an error here. It is an [`ExecutionOutcome`] with
//! [`ExecutionStatus::Failed`], which the dispatcher turns into a `fail` event.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
}

/// Result of running one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// Standard error on failure, or a description of why it failed.
    pub diagnostic: String,
    /// Captured standard output.
    pub stdout: String,
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn succeeded(stdout: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Succeeded,
            diagnostic: String::new(),
            stdout: stdout.into(),
            duration,
        }
    }

    pub fn failed(diagnostic: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            diagnostic: diagnostic.into(),
            stdout: String::new(),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}

/// Runs job commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` to completion.
    async fn run(&self, command: &str) -> ExecutionOutcome;
}

/// Executes commands through the platform shell (`sh -c` or `cmd /C`).
///
/// Without a timeout a command that never exits holds its worker forever.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    timeout: Option<Duration>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout` and report them as failed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn shell_command(command: &str) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command: &str) -> ExecutionOutcome {
        let start = Instant::now();

        let child = match Self::shell_command(command).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "executor",
                    op = "spawn",
                    error = %e,
                    "Failed to spawn shell"
                );
                return ExecutionOutcome::failed(
                    format!("failed to spawn command: {}", e),
                    start.elapsed(),
                );
            }
        };

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                // Dropping the future drops the child, which kills it.
                Err(_) => {
                    return ExecutionOutcome::failed(
                        format!("command timed out after {}ms", limit.as_millis()),
                        start.elapsed(),
                    );
                }
            },
            None => child.wait_with_output().await,
        };
        let duration = start.elapsed();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return ExecutionOutcome::failed(
                    format!("failed to wait for command: {}", e),
                    duration,
                )
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        debug!(
            subsystem = "jobs",
            component = "executor",
            op = "run",
            exit_code = ?output.status.code(),
            duration_ms = duration.as_millis() as u64,
            "Command finished"
        );

        if output.status.success() {
            return ExecutionOutcome::succeeded(stdout, duration);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let diagnostic = if stderr.is_empty() {
            match output.status.code() {
                Some(code) => format!("command exited with status {}", code),
                None => "command terminated by signal".to_string(),
            }
        } else {
            stderr
        };

        let mut outcome = ExecutionOutcome::failed(diagnostic, duration);
        outcome.stdout = stdout;
        outcome
    }
}

/// Executor that succeeds without running anything. Useful for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpExecutor;

#[async_trait]
impl CommandExecutor for NoOpExecutor {
    async fn run(&self, _command: &str) -> ExecutionOutcome {
        ExecutionOutcome::succeeded("", Duration::ZERO)
    }
}
