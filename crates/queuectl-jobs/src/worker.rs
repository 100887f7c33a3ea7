//! Job worker: poll loops that claim, run, and record jobs until cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use queuectl_core::{defaults, Error, Job, Result};
use queuectl_db::Database;

use crate::dispatcher::{Dispatcher, Processed};
use crate::executor::{CommandExecutor, ExecutionOutcome};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle sleep between polls when no job is eligible, in milliseconds.
    pub poll_interval_ms: u64,
    /// Number of worker loops to run.
    pub worker_count: usize,
    /// Whether to process jobs at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            worker_count: defaults::WORKER_COUNT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `QUEUECTL_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `QUEUECTL_WORKER_COUNT` | `1` | Number of worker loops |
    /// | `QUEUECTL_POLL_INTERVAL_MS` | `2000` | Idle sleep when the queue is empty |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("QUEUECTL_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let worker_count = lookup("QUEUECTL_WORKER_COUNT")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::WORKER_COUNT)
            .max(1);

        let poll_interval_ms = lookup("QUEUECTL_POLL_INTERVAL_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::WORKER_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            worker_count,
            enabled,
        }
    }

    /// Set the idle poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the number of worker loops (at least one).
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the job worker. `worker` is the loop index.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted {
        worker: usize,
    },
    JobStarted {
        worker: usize,
        job_id: String,
    },
    JobCompleted {
        worker: usize,
        job_id: String,
        duration_ms: u64,
    },
    JobRetrying {
        worker: usize,
        job_id: String,
        attempts: u32,
        scheduled_at: Option<DateTime<Utc>>,
    },
    JobDead {
        worker: usize,
        job_id: String,
        attempts: u32,
    },
    WorkerStopped {
        worker: usize,
    },
}

/// Handle for controlling running worker loops.
pub struct WorkerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Ask every loop to stop after its current job, then wait for them.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for every loop to exit.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            task.await
                .map_err(|e| Error::Internal(format!("worker task failed: {}", e)))?;
        }
        Ok(())
    }

    /// Token that stops the loops when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of loops started.
    pub fn worker_count(&self) -> usize {
        self.tasks.len()
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    dispatcher: Dispatcher,
    executor: Arc<dyn CommandExecutor>,
    config: WorkerConfig,
    notify: Arc<Notify>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(db: &Database, executor: Arc<dyn CommandExecutor>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            dispatcher: Dispatcher::from_database(db),
            executor,
            config,
            notify: db.jobs.job_notify(),
            event_tx,
        }
    }

    /// Start the worker loops and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        self.start_with_token(CancellationToken::new())
    }

    /// Start the worker loops, stopping when `cancel` is cancelled.
    pub fn start_with_token(self, cancel: CancellationToken) -> WorkerHandle {
        let event_rx = self.event_tx.subscribe();

        if !self.config.enabled {
            info!(
                subsystem = "jobs",
                component = "worker",
                "Job worker is disabled, not starting"
            );
            return WorkerHandle {
                cancel,
                tasks: Vec::new(),
                event_rx,
            };
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            op = "start",
            worker_count = self.config.worker_count,
            poll_interval_ms = self.config.poll_interval_ms,
            "Starting job workers"
        );

        let count = self.config.worker_count.max(1);
        let worker = Arc::new(self);
        let tasks = (0..count)
            .map(|idx| {
                let worker = worker.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(idx, cancel).await })
            })
            .collect();

        WorkerHandle {
            cancel,
            tasks,
            event_rx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// One worker loop. Cancellation is checked between jobs, so a job that
    /// has been claimed always runs to completion.
    async fn run(&self, worker: usize, cancel: CancellationToken) {
        info!(
            subsystem = "jobs",
            component = "worker",
            worker,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted { worker });

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Register for wakeups before scanning so a job created mid-scan
            // still wakes this loop.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.dispatcher.claim_next().await {
                Ok(Some(job)) => {
                    self.execute_job(worker, job, &cancel).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        op = "claim",
                        worker,
                        error = %e,
                        "Failed to claim job"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(poll_interval) => {}
                _ = &mut notified => {
                    debug!(subsystem = "jobs", component = "worker", worker, "Woken by new job");
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped { worker });
        info!(
            subsystem = "jobs",
            component = "worker",
            worker,
            "Job worker stopped"
        );
    }

    async fn execute_job(&self, worker: usize, job: Job, cancel: &CancellationToken) {
        let start = Instant::now();

        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            worker,
            job_id: job.id.clone(),
        });

        let outcome = self.dispatcher.run(&job, self.executor.as_ref()).await;
        let Some(processed) = self.record(worker, &job, &outcome, cancel).await else {
            return;
        };

        let event = match processed {
            Processed::Completed(job) => WorkerEvent::JobCompleted {
                worker,
                job_id: job.id,
                duration_ms: start.elapsed().as_millis() as u64,
            },
            Processed::Retrying(job) => WorkerEvent::JobRetrying {
                worker,
                job_id: job.id,
                attempts: job.attempts,
                scheduled_at: job.scheduled_at,
            },
            Processed::Dead(job) => WorkerEvent::JobDead {
                worker,
                job_id: job.id,
                attempts: job.attempts,
            },
            Processed::Idle => return,
        };

        let _ = self.event_tx.send(event);
    }

    /// Record `outcome` for `job`, retrying storage failures with a bounded
    /// backoff. The command is not run again.
    ///
    /// Returns `None` on a non-storage error or when cancelled first; the job
    /// is then left in processing.
    async fn record(
        &self,
        worker: usize,
        job: &Job,
        outcome: &ExecutionOutcome,
        cancel: &CancellationToken,
    ) -> Option<Processed> {
        let max_delay = Duration::from_millis(defaults::RECORD_RETRY_MAX_MS);
        let mut delay = Duration::from_millis(defaults::RECORD_RETRY_INITIAL_MS);

        loop {
            let err = match self.dispatcher.complete_at(job, outcome, Utc::now()).await {
                Ok(processed) => return Some(processed),
                Err(e) => e,
            };

            if !err.is_storage() {
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    op = "record",
                    worker,
                    job_id = %job.id,
                    error = %err,
                    "Failed to record job outcome"
                );
                return None;
            }

            warn!(
                subsystem = "jobs",
                component = "worker",
                op = "record",
                worker,
                job_id = %job.id,
                retry_ms = delay.as_millis() as u64,
                error = %err,
                "Storage error recording job outcome, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        op = "record",
                        worker,
                        job_id = %job.id,
                        "Shutdown before job outcome was recorded"
                    );
                    return None;
                }
                _ = sleep(delay) => {}
            }
            delay = (delay * 2).min(max_delay);
        }
    }
}

/// Builder for creating a job worker.
pub struct WorkerBuilder {
    db: Database,
    config: WorkerConfig,
    executor: Arc<dyn CommandExecutor>,
}

impl WorkerBuilder {
    /// Create a new worker builder that runs commands through the shell.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            config: WorkerConfig::default(),
            executor: Arc::new(crate::executor::ShellExecutor::new()),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the executor.
    pub fn with_executor<E: CommandExecutor + 'static>(mut self, executor: E) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// Build and return the worker.
    pub fn build(self) -> JobWorker {
        JobWorker::new(&self.db, self.executor, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, 2_000);
        assert_eq!(config.worker_count, 1);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(100)
            .with_worker_count(4)
            .with_enabled(false);

        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.worker_count, 4);
        assert!(!config.enabled);
    }

    #[test]
    fn test_worker_count_floor_is_one() {
        assert_eq!(WorkerConfig::default().with_worker_count(0).worker_count, 1);
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.poll_interval_ms, defaults::WORKER_POLL_INTERVAL_MS);
        assert_eq!(config.worker_count, defaults::WORKER_COUNT);
        assert!(config.enabled);
    }

    #[test]
    fn test_from_lookup_reads_values() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("QUEUECTL_WORKER_ENABLED", "false"),
            ("QUEUECTL_WORKER_COUNT", "3"),
            ("QUEUECTL_POLL_INTERVAL_MS", "250"),
        ]));
        assert!(!config.enabled);
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.poll_interval_ms, 250);
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("QUEUECTL_WORKER_ENABLED", "0"),
            ("QUEUECTL_WORKER_COUNT", "many"),
            ("QUEUECTL_POLL_INTERVAL_MS", "-5"),
        ]));
        assert!(!config.enabled);
        assert_eq!(config.worker_count, defaults::WORKER_COUNT);
        assert_eq!(config.poll_interval_ms, defaults::WORKER_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_from_lookup_zero_workers_clamped() {
        let config = WorkerConfig::from_lookup(lookup(&[("QUEUECTL_WORKER_COUNT", "0")]));
        assert_eq!(config.worker_count, 1);
    }

    #[test]
    fn test_worker_event_clone_eq() {
        let event = WorkerEvent::JobRetrying {
            worker: 0,
            job_id: "j".to_string(),
            attempts: 1,
            scheduled_at: None,
        };
        assert_eq!(event.clone(), event);
    }
}
