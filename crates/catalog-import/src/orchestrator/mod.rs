//! Import orchestrator - main workflow coordinator.
//!
//! A run moves through `discover files -> reset staging table -> load each
//! file -> report`. Connection-level failures abort the run; everything else
//! is recorded against the file that caused it and the run carries on.

mod file_job;

pub use file_job::{FileOutcome, FileStatus};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, LoadMode};
use crate::error::{ImportError, Result};
use crate::schema::StagingTable;
use crate::target::{PgTarget, StagingTarget};
use file_job::{FileJob, FileSettings};

/// Import orchestrator.
pub struct Orchestrator {
    config: Config,
    table: Arc<StagingTable>,
    target: Arc<dyn StagingTarget>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Result of an import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    /// Unique run identifier.
    pub run_id: String,

    pub status: RunStatus,

    pub load_mode: LoadMode,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Feed files found in the input directory.
    pub files_total: usize,

    pub files_loaded: usize,

    pub files_failed: usize,

    pub files_cancelled: usize,

    /// Files never started because the run was cancelled.
    pub files_skipped: usize,

    /// Rows committed across all files.
    pub rows_committed: u64,

    /// Row count of the staging table after the run, if it could be read.
    pub staged_rows: Option<i64>,

    /// Per-file outcomes in input order.
    pub files: Vec<FileOutcome>,
}

impl ImportReport {
    /// Serialize the report as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Names of the files that failed.
    pub fn failed_files(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Failed)
            .map(|f| f.file.as_str())
            .collect()
    }

    /// The error a completed run should still be reported as, if any.
    ///
    /// Failed files only count when `fail_on_file_error` is set.
    pub fn exit_error(&self, fail_on_file_error: bool) -> Option<ImportError> {
        if self.status == RunStatus::Cancelled {
            return Some(ImportError::Cancelled);
        }
        if fail_on_file_error && self.files_failed > 0 {
            return Some(ImportError::FilesFailed {
                failed: self.files_failed,
                total: self.files_total,
            });
        }
        None
    }
}

impl Orchestrator {
    /// Create an orchestrator connected to the configured PostgreSQL database.
    pub async fn new(config: Config) -> Result<Self> {
        // One connection per worker plus one for schema reset and counts.
        let max_conns = config.import.workers + 1;
        let target = PgTarget::new(&config.database, max_conns).await?;
        Ok(Self::with_target(config, Arc::new(target)))
    }

    /// Create an orchestrator over an existing target.
    pub fn with_target(config: Config, target: Arc<dyn StagingTarget>) -> Self {
        let table = StagingTable::canonical(&config.database.schema, &config.import.staging_table);
        Self {
            config,
            table: Arc::new(table),
            target,
        }
    }

    pub fn staging_table(&self) -> &StagingTable {
        &self.table
    }

    pub fn target(&self) -> &Arc<dyn StagingTarget> {
        &self.target
    }

    /// Run the import.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ImportReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let import = &self.config.import;

        info!("Process started.");
        info!(
            "Import run {} (load mode: {}, workers: {}, batch size: {})",
            run_id, import.load_mode, import.workers, import.batch_size
        );

        let files = discover_feed_files(&import.input_dir)?;
        info!("{} CSV files found to process.", files.len());

        self.target.reset_table(&self.table).await?;
        info!("Table {} dropped and recreated.", self.table.full_name());

        let outcomes = self.load_files(&files, &cancel).await?;

        let staged_rows = match self.target.row_count(&self.table).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Could not count rows in {}: {}", self.table.full_name(), e);
                None
            }
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let count = |status: FileStatus| outcomes.iter().filter(|o| o.status == status).count();

        let report = ImportReport {
            run_id,
            status: if cancel.is_cancelled() {
                RunStatus::Cancelled
            } else {
                RunStatus::Completed
            },
            load_mode: import.load_mode,
            duration_seconds: duration,
            started_at,
            completed_at,
            files_total: files.len(),
            files_loaded: count(FileStatus::Loaded),
            files_failed: count(FileStatus::Failed),
            files_cancelled: count(FileStatus::Cancelled),
            files_skipped: files.len() - outcomes.len(),
            rows_committed: outcomes.iter().map(|o| o.rows_committed).sum(),
            staged_rows,
            files: outcomes,
        };

        if report.files_failed > 0 {
            warn!(
                "{} of {} files failed: {}",
                report.files_failed,
                report.files_total,
                report.failed_files().join(", ")
            );
        }
        if report.status == RunStatus::Cancelled {
            warn!(
                "Run cancelled: {} files cancelled, {} not started",
                report.files_cancelled, report.files_skipped
            );
        }
        info!(
            "Loaded {} of {} files, {} rows committed ({} rows in {}).",
            report.files_loaded,
            report.files_total,
            report.rows_committed,
            report
                .staged_rows
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".into()),
            self.table.full_name()
        );
        info!(
            "Process finished. Total time: {}.",
            format_total_time(Duration::from_secs_f64(duration.max(0.0)))
        );

        Ok(report)
    }

    /// Load files with at most `workers` in flight.
    async fn load_files(
        &self,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<Vec<FileOutcome>> {
        let import = &self.config.import;
        let settings = Arc::new(FileSettings {
            table: Arc::clone(&self.table),
            partner_id: import.partner_id.trim().to_string(),
            batch_size: import.batch_size,
            pipeline_depth: import.pipeline_depth,
            load_mode: import.load_mode,
            copy_timeout: import.copy_timeout(),
        });

        // Cancelled by the caller, or by a worker hitting a connection failure.
        let stop = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(import.workers));
        let mut handles = Vec::with_capacity(files.len());

        for (i, path) in files.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if stop.is_cancelled() {
                break;
            }

            let job = FileJob::new(path.clone(), i + 1, files.len());
            let name = job.name.clone();
            let target = Arc::clone(&self.target);
            let settings = Arc::clone(&settings);
            let worker_stop = stop.clone();

            let handle = tokio::spawn(async move {
                let result = job.run(target, settings, worker_stop.clone()).await;
                if result.is_err() {
                    worker_stop.cancel();
                }
                drop(permit);
                result
            });

            handles.push((name, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut fatal: Option<ImportError> = None;

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => {
                    error!("File {}: connection lost: {}", name, e);
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    error!("File {}: task panicked - {}", name, e);
                    outcomes.push(FileOutcome {
                        file: name,
                        status: FileStatus::Failed,
                        rows_committed: 0,
                        batches_copied: 0,
                        duration_seconds: 0.0,
                        error: Some(format!("Task panicked: {}", e)),
                    });
                }
            }
        }

        if let Some(e) = fatal {
            error!("Import aborted: {}", e);
            return Err(e);
        }

        Ok(outcomes)
    }
}

/// List the `*.csv` files of a directory, sorted by name.
pub fn discover_feed_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ImportError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("input directory {} does not exist", dir.display()),
        )));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path.extension().map(|ext| ext == "csv").unwrap_or(false);
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

/// Render a duration as `Hh Mmin`.
pub fn format_total_time(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    format!("{}h {}min", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_format_total_time() {
        assert_eq!(format_total_time(Duration::from_secs(0)), "0h 0min");
        assert_eq!(format_total_time(Duration::from_secs(59)), "0h 0min");
        assert_eq!(format_total_time(Duration::from_secs(3 * 3600 + 7 * 60 + 5)), "3h 7min");
    }

    #[test]
    fn test_discover_feed_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.csv"), "x\n").unwrap();
        fs::write(dir.path().join("a.csv"), "x\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "x\n").unwrap();
        fs::create_dir(dir.path().join("nested.csv")).unwrap();

        let files = discover_feed_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn test_missing_input_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = discover_feed_files(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ImportError::Io(_)));
    }

    #[test]
    fn test_exit_error() {
        let mut report = ImportReport {
            run_id: "r".into(),
            status: RunStatus::Completed,
            load_mode: LoadMode::BestEffort,
            duration_seconds: 0.0,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            files_total: 3,
            files_loaded: 2,
            files_failed: 1,
            files_cancelled: 0,
            files_skipped: 0,
            rows_committed: 10,
            staged_rows: Some(10),
            files: Vec::new(),
        };
        assert!(report.exit_error(false).is_none());
        assert!(matches!(
            report.exit_error(true),
            Some(ImportError::FilesFailed { failed: 1, total: 3 })
        ));

        report.status = RunStatus::Cancelled;
        assert!(matches!(report.exit_error(false), Some(ImportError::Cancelled)));
    }
}
