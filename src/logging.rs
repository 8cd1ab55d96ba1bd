//! Tracing setup.
//!
//! Human-readable output always goes to stderr. With a log directory, a JSON
//! copy is also written to `{dir}/slot-relay.log.YYYY-MM-DD` with daily
//! rotation. Both honour `RUST_LOG` (default: `info`).

use std::path::Path;

use anyhow::Context;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_PREFIX: &str = "slot-relay.log";

/// Keeps the file writer alive. Dropping it flushes pending entries.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Install the global subscriber.
///
/// Returns a guard when file logging is enabled; hold it until exit.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<Option<LoggingGuard>> {
    let (subscriber, guard) = build(log_dir)?;
    subscriber.init();
    Ok(guard)
}

/// Assemble the subscriber without installing it.
fn build(
    log_dir: Option<&Path>,
) -> anyhow::Result<(impl Subscriber + Send + Sync + 'static, Option<LoggingGuard>)> {
    let mut guard = None;
    let json_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, worker) = tracing_appender::non_blocking(file_appender);
            guard = Some(LoggingGuard { _guard: worker });
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking),
            )
        }
        None => None,
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json_layer)
        .with(console_layer);

    Ok((subscriber, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_files(dir: &Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
            })
            .collect()
    }

    #[test]
    fn console_only_has_no_guard() {
        let (_subscriber, guard) = build(None).unwrap();
        assert!(guard.is_none());
    }

    #[test]
    fn log_dir_gets_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs").join("relay");

        let (subscriber, guard) = build(Some(&logs)).unwrap();
        assert!(guard.is_some());
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(id = 42u64, "watermark write slow");
        });
        drop(guard);

        let files = log_files(&logs);
        assert_eq!(files.len(), 1, "files: {files:?}");
        let contents = std::fs::read_to_string(&files[0]).unwrap();
        let line = contents.lines().next().expect("one log line");
        let entry: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(entry["level"], "WARN");
        assert_eq!(entry["fields"]["message"], "watermark write slow");
        assert_eq!(entry["fields"]["id"], 42);
    }

    #[test]
    fn unusable_log_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("taken");
        std::fs::write(&blocker, "not a directory").unwrap();

        assert!(build(Some(&blocker.join("logs"))).is_err());
    }
}
