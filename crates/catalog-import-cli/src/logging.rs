//! Log setup: stdout plus one log file per run.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Timestamps in local time, `25/12/2024 13:05:09`.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", Local::now().format("%d/%m/%Y %H:%M:%S"))
    }
}

/// Name of the log file for a run started now.
pub fn log_file_name() -> String {
    Local::now().format("%d%m%Y_%H%M%S.log").to_string()
}

fn parse_level(verbosity: &str) -> Level {
    match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber.
///
/// Returns the path of the log file and the guard that flushes it; the guard
/// must live until the process exits. `RUST_LOG` overrides `verbosity`.
pub fn setup_logging(log_dir: &Path, verbosity: &str) -> Result<(PathBuf, WorkerGuard), String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("cannot create log directory {}: {}", log_dir.display(), e))?;

    let file_name = log_file_name();
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&file_name)
        .build(log_dir)
        .map_err(|e| format!("cannot open log file in {}: {}", log_dir.display(), e))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(parse_level(verbosity)).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimer)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(LocalTimer)
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok((log_dir.join(file_name), guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name_format() {
        let name = log_file_name();
        // ddmmYYYY_HHMMSS.log
        assert_eq!(name.len(), 19);
        assert!(name.ends_with(".log"));
        assert_eq!(&name[8..9], "_");
        assert!(name[..8].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("chatty"), Level::INFO);
    }
}
