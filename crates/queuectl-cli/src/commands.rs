//! Command handlers. Results go to `out`; logs go through tracing.

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tracing::{error, info};

use queuectl_core::JobState;
use queuectl_db::Database;
use queuectl_jobs::{DlqRetry, QueueAdmin, ShellExecutor, WorkerBuilder, WorkerConfig, WorkerHandle};

use crate::cli::{Commands, ConfigCommands, DlqCommands, WorkerArgs, WorkerCommands};

pub async fn execute(command: Commands, db: &Database, out: &mut dyn Write) -> anyhow::Result<()> {
    let admin = QueueAdmin::from_database(db);

    match command {
        Commands::Enqueue { json } => enqueue(&admin, &json, out).await,
        Commands::EnqueueFile { path } => {
            let json = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            enqueue(&admin, &json, out).await
        }
        Commands::List { state } => {
            let jobs = match state {
                Some(state) => admin.list_by_state(&state).await?,
                None => admin.list_all().await?,
            };
            print_json(out, &jobs)
        }
        Commands::Get { id } => print_json(out, &admin.get(&id).await?),
        Commands::Status => {
            let summary = admin.status().await?;
            for state in JobState::ALL {
                writeln!(out, "{:<11} {}", state.as_str(), summary.count(state))?;
            }
            writeln!(out, "{:<11} {}", "total", summary.total)?;
            Ok(())
        }
        Commands::Dlq { command } => match command {
            DlqCommands::List => print_json(out, &admin.dlq_list().await?),
            DlqCommands::Retry { id } => {
                match admin.dlq_retry(&id).await? {
                    DlqRetry::Retried(job) => {
                        writeln!(out, "Job '{}' moved from DLQ to pending", job.id)?
                    }
                    DlqRetry::NotFoundOrNotDead => {
                        writeln!(out, "Job '{}' not found in DLQ", id)?
                    }
                }
                Ok(())
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Set { key, value } => {
                let stored = admin.config_set(&key, &value).await?;
                writeln!(out, "Set {} = {}", key.trim(), stored)?;
                Ok(())
            }
            ConfigCommands::Show => print_json(out, &admin.config_show().await?),
        },
        Commands::Worker {
            command: WorkerCommands::Start(args),
        } => run_worker(db, &args).await,
    }
}

async fn enqueue(admin: &QueueAdmin, json: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let job = admin.submit_json(json).await?;
    writeln!(out, "Enqueued job '{}'", job.id)?;
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> anyhow::Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Worker settings: environment first, then command-line overrides.
fn worker_config(args: &WorkerArgs) -> WorkerConfig {
    let mut config = WorkerConfig::from_env();
    if let Some(count) = args.count {
        config = config.with_worker_count(count);
    }
    if let Some(ms) = args.poll_interval_ms {
        config = config.with_poll_interval(ms);
    }
    config
}

fn start_worker(db: &Database, args: &WorkerArgs) -> WorkerHandle {
    let mut executor = ShellExecutor::new();
    if let Some(ms) = args.timeout_ms {
        executor = executor.with_timeout(Duration::from_millis(ms));
    }

    WorkerBuilder::new(db.clone())
        .with_config(worker_config(args))
        .with_executor(executor)
        .build()
        .start()
}

/// Run workers until Ctrl-C, then let in-flight jobs finish.
async fn run_worker(db: &Database, args: &WorkerArgs) -> anyhow::Result<()> {
    let handle = start_worker(db, args);
    if handle.worker_count() == 0 {
        return Ok(());
    }

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(
                subsystem = "cli",
                op = "shutdown",
                "Interrupt received, finishing in-flight jobs"
            ),
            Err(e) => error!(
                subsystem = "cli",
                op = "shutdown",
                error = %e,
                "Cannot listen for Ctrl-C, stopping workers"
            ),
        }
        cancel.cancel();
    });

    handle.join().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuectl_db::test_fixtures::TestDatabase;
    use serde_json::Value as JsonValue;

    async fn run(db: &Database, command: Commands) -> anyhow::Result<String> {
        let mut out = Vec::new();
        execute(command, db, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn enqueue_cmd(id: &str, command: &str) -> Commands {
        Commands::Enqueue {
            json: serde_json::json!({ "id": id, "command": command }).to_string(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_list() {
        let test_db = TestDatabase::new().await;
        let db = &test_db.db;

        let out = run(db, enqueue_cmd("job1", "echo hi")).await.unwrap();
        assert_eq!(out, "Enqueued job 'job1'\n");

        let out = run(
            db,
            Commands::List {
                state: Some("pending".to_string()),
            },
        )
        .await
        .unwrap();
        let jobs: JsonValue = serde_json::from_str(&out).unwrap();
        assert_eq!(jobs[0]["id"], "job1");
        assert_eq!(jobs[0]["state"], "pending");
        assert_eq!(jobs[0]["attempts"], 0);
        assert_eq!(jobs[0]["max_retries"], 3);
    }

    #[tokio::test]
    async fn test_enqueue_file() {
        let test_db = TestDatabase::new().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(&path, r#"{"id":"from-file","command":"true"}"#).unwrap();

        run(&test_db.db, Commands::EnqueueFile { path }).await.unwrap();

        let out = run(
            &test_db.db,
            Commands::Get {
                id: "from-file".to_string(),
            },
        )
        .await
        .unwrap();
        let job: JsonValue = serde_json::from_str(&out).unwrap();
        assert_eq!(job["command"], "true");
    }

    #[tokio::test]
    async fn test_enqueue_missing_file_fails() {
        let test_db = TestDatabase::new().await;
        let err = run(
            &test_db.db,
            Commands::EnqueueFile {
                path: "/nonexistent/job.json".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[tokio::test]
    async fn test_list_unknown_state_fails() {
        let test_db = TestDatabase::new().await;
        let err = run(
            &test_db.db,
            Commands::List {
                state: Some("bogus".to_string()),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("Invalid state: bogus"));
    }

    #[tokio::test]
    async fn test_status_lists_every_state() {
        let test_db = TestDatabase::new().await;
        run(&test_db.db, enqueue_cmd("a", "true")).await.unwrap();

        let out = run(&test_db.db, Commands::Status).await.unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "pending     1");
        assert_eq!(lines[4], "dead        0");
        assert_eq!(lines[5], "total       1");
    }

    #[tokio::test]
    async fn test_dlq_retry_reports_missing() {
        let test_db = TestDatabase::new().await;
        let out = run(
            &test_db.db,
            Commands::Dlq {
                command: DlqCommands::Retry {
                    id: "ghost".to_string(),
                },
            },
        )
        .await
        .unwrap();
        assert_eq!(out, "Job 'ghost' not found in DLQ\n");

        let out = run(
            &test_db.db,
            Commands::Dlq {
                command: DlqCommands::List,
            },
        )
        .await
        .unwrap();
        assert_eq!(out.trim(), "[]");
    }

    #[tokio::test]
    async fn test_config_set_and_show() {
        let test_db = TestDatabase::new().await;
        let out = run(
            &test_db.db,
            Commands::Config {
                command: ConfigCommands::Set {
                    key: "max_retries".to_string(),
                    value: "5".to_string(),
                },
            },
        )
        .await
        .unwrap();
        assert_eq!(out, "Set max_retries = 5\n");

        let out = run(
            &test_db.db,
            Commands::Config {
                command: ConfigCommands::Show,
            },
        )
        .await
        .unwrap();
        let report: JsonValue = serde_json::from_str(&out).unwrap();
        assert_eq!(report["effective"]["max_retries"], 5);
        assert_eq!(report["entries"]["max_retries"], 5);
    }

    #[tokio::test]
    async fn test_config_set_rejects_bad_value() {
        let test_db = TestDatabase::new().await;
        let err = run(
            &test_db.db,
            Commands::Config {
                command: ConfigCommands::Set {
                    key: "backoff_base".to_string(),
                    value: "zero".to_string(),
                },
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("backoff_base"));
    }

    #[test]
    fn test_worker_config_overrides() {
        let config = worker_config(&WorkerArgs {
            count: Some(3),
            poll_interval_ms: Some(250),
            timeout_ms: None,
        });
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.poll_interval_ms, 250);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_started_worker_runs_shell_jobs() {
        let test_db = TestDatabase::new().await;
        run(&test_db.db, enqueue_cmd("shell", "exit 0")).await.unwrap();

        let handle = start_worker(
            &test_db.db,
            &WorkerArgs {
                count: Some(1),
                poll_interval_ms: Some(50),
                timeout_ms: Some(5_000),
            },
        );

        let admin = QueueAdmin::from_database(&test_db.db);
        let mut state = JobState::Pending;
        for _ in 0..200 {
            state = admin.get("shell").await.unwrap().state;
            if state == JobState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        handle.shutdown().await.unwrap();

        assert_eq!(state, JobState::Completed);
    }
}
