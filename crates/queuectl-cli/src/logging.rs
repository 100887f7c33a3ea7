//! Tracing setup for the binary.
//!
//! Environment variables:
//!   LOG_FORMAT - "json" or "text" (default: "text")
//!   LOG_FILE   - path to log file (optional, daily rotation)
//!   LOG_ANSI   - "true"/"false" override ANSI colors (auto-detected by default)
//!   RUST_LOG   - standard env filter (default: "queuectl=info")
//!
//! Console output goes to stderr so command output on stdout stays parseable.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "queuectl=info";
const DEFAULT_LOG_FILE_NAME: &str = "queuectl.log";

/// Install the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init() -> Option<WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");
    let json = log_format.eq_ignore_ascii_case("json");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let (dir, file_name) = split_log_path(path);
        let file_appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        return Some(guard);
    }

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        if let Some(ansi) = log_ansi {
            layer = layer.with_ansi(ansi);
        }
        registry.with(layer).init();
    }
    None
}

/// Directory and file name for the rolling appender.
fn split_log_path(path: &str) -> (&Path, &str) {
    let path = Path::new(path);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(DEFAULT_LOG_FILE_NAME);
    (dir, file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_path() {
        assert_eq!(
            split_log_path("/var/log/queuectl/worker.log"),
            (Path::new("/var/log/queuectl"), "worker.log")
        );
        assert_eq!(split_log_path("worker.log"), (Path::new("."), "worker.log"));
        assert_eq!(split_log_path("/"), (Path::new("."), DEFAULT_LOG_FILE_NAME));
    }
}
