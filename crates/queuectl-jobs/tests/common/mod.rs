//! Shared helpers for queuectl-jobs integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use queuectl_jobs::{CommandExecutor, ExecutionOutcome, ExecutionStatus, JobState, QueueAdmin};

/// Executor that replays scripted outcomes per command instead of running it.
///
/// Commands without a script succeed. Every call is recorded.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<HashMap<String, VecDeque<ExecutionStatus>>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue outcomes for `command`, consumed one per run.
    pub fn script(self, command: &str, outcomes: &[ExecutionStatus]) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .extend(outcomes.iter().copied());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, command: &str) -> ExecutionOutcome {
        self.calls.lock().unwrap().push(command.to_string());
        let status = self
            .script
            .lock()
            .unwrap()
            .get_mut(command)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ExecutionStatus::Succeeded);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match status {
            ExecutionStatus::Succeeded => ExecutionOutcome::succeeded("", self.delay),
            ExecutionStatus::Failed => {
                ExecutionOutcome::failed(format!("scripted failure: {}", command), self.delay)
            }
        }
    }
}

/// Poll until `id` reaches `state`, or give up after `timeout`.
pub async fn wait_for_state(
    admin: &QueueAdmin,
    id: &str,
    state: JobState,
    timeout: Duration,
) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if let Ok(job) = admin.get(id).await {
            if job.state == state {
                return true;
            }
        }
        sleep(Duration::from_millis(25)).await;
    }
    false
}
