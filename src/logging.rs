//! Tracing subscriber setup

use anyhow::Context;
use once_cell::sync::OnceCell;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;

/// Keeps the file writer flushing until the process exits
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

const LOG_FILE_PREFIX: &str = "devgate";

/// Install the global subscriber. Logs go to stderr, or to a daily rolling
/// file under `log_dir` when one is given. A subscriber installed earlier is
/// left in place.
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let level = resolve_log_level(std::env::var("RUST_LOG").ok().as_deref());

    match log_dir {
        None => {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .try_init();
        }
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = FILE_GUARD.set(guard);

            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(non_blocking)
                .try_init();
        }
    }

    tracing::info!("devgate v{} logging initialized", crate::VERSION);
    Ok(())
}

pub fn resolve_log_level(value: Option<&str>) -> LevelFilter {
    match value.map(str::to_lowercase).as_deref() {
        Some("trace") => LevelFilter::TRACE,
        Some("debug") => LevelFilter::DEBUG,
        Some("info") => LevelFilter::INFO,
        Some("warn") | Some("warning") => LevelFilter::WARN,
        Some("error") => LevelFilter::ERROR,
        Some("off") => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_map_from_rust_log() {
        assert_eq!(resolve_log_level(Some("DEBUG")), LevelFilter::DEBUG);
        assert_eq!(resolve_log_level(Some("warning")), LevelFilter::WARN);
        assert_eq!(resolve_log_level(Some("devgate=trace")), LevelFilter::INFO);
        assert_eq!(resolve_log_level(None), LevelFilter::INFO);
    }

    #[test]
    fn file_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        init(Some(&logs)).unwrap();
        assert!(logs.is_dir());
    }
}
