//! Loading of a single feed file.
//!
//! Parsing, row repair, batching and CSV encoding happen on a blocking thread
//! that feeds encoded batches through a bounded channel; the async side
//! copies them into the staging table strictly in order.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::Batcher;
use crate::config::LoadMode;
use crate::error::{ImportError, Result};
use crate::loader::{encode_batch, EncodedBatch};
use crate::normalize::{generated_columns, normalize_header, unknown_columns};
use crate::schema::StagingTable;
use crate::target::{LoadSession, StagingTarget};

/// Settings shared by every file of a run.
#[derive(Debug, Clone)]
pub(crate) struct FileSettings {
    pub table: Arc<StagingTable>,
    pub partner_id: String,
    pub batch_size: usize,
    pub pipeline_depth: usize,
    pub load_mode: LoadMode,
    pub copy_timeout: Duration,
}

/// Final state of one feed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Loaded,
    Failed,
    Cancelled,
}

/// What happened to one feed file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: String,
    pub status: FileStatus,
    /// Rows that are durably in the staging table.
    pub rows_committed: u64,
    pub batches_copied: usize,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One feed file queued for loading.
#[derive(Debug, Clone)]
pub(crate) struct FileJob {
    pub path: PathBuf,
    pub name: String,
    /// 1-based position in the run.
    pub position: usize,
    pub total: usize,
}

impl FileJob {
    pub fn new(path: PathBuf, position: usize, total: usize) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            position,
            total,
        }
    }

    /// Load the file.
    ///
    /// Per-file failures are reported in the returned outcome. `Err` is
    /// reserved for connection-level failures that end the run.
    pub async fn run(
        self,
        target: Arc<dyn StagingTarget>,
        settings: Arc<FileSettings>,
        cancel: CancellationToken,
    ) -> Result<FileOutcome> {
        info!(
            "({}/{}) Processing file: {}",
            self.position, self.total, self.name
        );
        info!("Starting processing file: {}", self.path.display());
        let start = Instant::now();

        let opened = with_deadline(
            settings.copy_timeout,
            || format!("opening load session for {}", self.name),
            target.open_session(&settings.table, settings.load_mode),
        )
        .await;
        let mut session: Box<dyn LoadSession> = match opened {
            Ok(session) => session,
            Err(e) if e.is_connection_failure() => return Err(e),
            Err(e) => {
                error!("File {}: could not open load session: {}", self.name, e);
                return Ok(self.outcome(FileStatus::Failed, 0, 0, start, Some(e)));
            }
        };

        let (tx, mut rx) = mpsc::channel::<Result<EncodedBatch>>(settings.pipeline_depth);
        let producer = {
            let path = self.path.clone();
            let name = self.name.clone();
            let settings = Arc::clone(&settings);
            tokio::task::spawn_blocking(move || {
                if let Err(e) = produce_batches(&path, &name, &settings, &tx) {
                    // The consumer may already be gone; nothing left to report to.
                    let _ = tx.blocking_send(Err(e));
                }
            })
        };

        let mut copied_rows: u64 = 0;
        let mut committed_rows: u64 = 0;
        let mut batches_copied = 0;
        let mut failure: Option<ImportError> = None;
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = rx.recv() => next,
            };

            let batch = match next {
                Some(Ok(batch)) => batch,
                Some(Err(e)) => {
                    error!("File {}: read failed: {}", self.name, e);
                    failure = Some(e);
                    break;
                }
                None => break,
            };

            let copied = with_deadline(
                settings.copy_timeout,
                || format!("COPY of batch {} from {}", batch.index, self.name),
                session.copy_batch(&batch),
            )
            .await;
            match copied {
                Ok(copied) => {
                    copied_rows += copied;
                    if settings.load_mode == LoadMode::BestEffort {
                        committed_rows += copied;
                    }
                    batches_copied += 1;
                    debug!(
                        "File {}: batch {} copied ({} rows, {} bytes)",
                        self.name,
                        batch.index,
                        copied,
                        batch.payload.len()
                    );
                }
                Err(e) => {
                    if matches!(e, ImportError::Timeout { .. }) {
                        session.abort();
                    }
                    error!("File {}: batch {} failed: {}", self.name, batch.index, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        drop(rx);
        if let Err(e) = producer.await {
            if failure.is_none() && !cancelled {
                let e = ImportError::file(&self.name, format!("reader task failed: {}", e));
                error!("{}", e);
                failure = Some(e);
            }
        }

        if failure.is_none() && !cancelled {
            let committed = with_deadline(
                settings.copy_timeout,
                || format!("COMMIT of {}", self.name),
                session.commit(),
            )
            .await;
            match committed {
                Ok(()) => committed_rows = copied_rows,
                Err(e) => {
                    if matches!(e, ImportError::Timeout { .. }) {
                        session.abort();
                    }
                    error!("File {}: commit failed: {}", self.name, e);
                    failure = Some(e);
                }
            }
        }

        if failure.is_some() || cancelled {
            let rolled_back = with_deadline(
                settings.copy_timeout,
                || format!("ROLLBACK of {}", self.name),
                session.rollback(),
            )
            .await;
            if let Err(e) = rolled_back {
                if matches!(e, ImportError::Timeout { .. }) {
                    session.abort();
                }
                warn!("File {}: rollback failed: {}", self.name, e);
            }
        }

        match failure {
            Some(e) if e.is_connection_failure() => Err(e),
            Some(e) => Ok(self.outcome(
                FileStatus::Failed,
                committed_rows,
                batches_copied,
                start,
                Some(e),
            )),
            None if cancelled => {
                warn!(
                    "File {}: cancelled after {} batches ({} rows committed)",
                    self.name, batches_copied, committed_rows
                );
                Ok(self.outcome(
                    FileStatus::Cancelled,
                    committed_rows,
                    batches_copied,
                    start,
                    None,
                ))
            }
            None => {
                info!(
                    "File {} processed: {} records in {:.2} seconds.",
                    self.name,
                    committed_rows,
                    start.elapsed().as_secs_f64()
                );
                Ok(self.outcome(
                    FileStatus::Loaded,
                    committed_rows,
                    batches_copied,
                    start,
                    None,
                ))
            }
        }
    }

    fn outcome(
        &self,
        status: FileStatus,
        rows_committed: u64,
        batches_copied: usize,
        start: Instant,
        error: Option<ImportError>,
    ) -> FileOutcome {
        FileOutcome {
            file: self.name.clone(),
            status,
            rows_committed,
            batches_copied,
            duration_seconds: start.elapsed().as_secs_f64(),
            error: error.map(|e| e.to_string()),
        }
    }
}

/// Await one session step, failing with `ImportError::Timeout` after `deadline`.
///
/// The step is dropped on timeout; the caller decides whether its connection
/// can still be used.
async fn with_deadline<T, F>(
    deadline: Duration,
    operation: impl FnOnce() -> String,
    step: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, step).await {
        Ok(result) => result,
        Err(_) => Err(ImportError::Timeout {
            operation: operation(),
            seconds: deadline.as_secs(),
        }),
    }
}

/// Read, normalize, batch and encode a feed file into `tx`.
///
/// Returns early without error when the receiving side hangs up.
fn produce_batches(
    path: &Path,
    name: &str,
    settings: &FileSettings,
    tx: &mpsc::Sender<Result<EncodedBatch>>,
) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let raw_header = reader.headers()?.clone();
    let header = normalize_header(&raw_header.iter().collect::<Vec<_>>());
    if header.needs_injection {
        debug!("File {}: injecting partner_id {}", name, settings.partner_id);
    }

    let unknown = unknown_columns(&header, &settings.table);
    if !unknown.is_empty() {
        warn!(
            "File {}: columns not in {}: {}",
            name,
            settings.table.full_name(),
            unknown.join(", ")
        );
    }

    let overridden = generated_columns(&header, &settings.table);
    if !overridden.is_empty() {
        warn!(
            "File {}: feed supplies generated columns of {}, table defaults are overridden: {}",
            name,
            settings.table.full_name(),
            overridden.join(", ")
        );
    }

    let rows = reader.into_records().map(|record| {
        record
            .map(|r| r.iter().map(str::to_string).collect::<Vec<String>>())
            .map_err(ImportError::from)
    });

    let batches = Batcher::new(
        rows,
        &header,
        settings.partner_id.as_str(),
        settings.batch_size,
    );
    for batch in batches {
        let encoded = encode_batch(batch?)?;
        if tx.blocking_send(Ok(encoded)).is_err() {
            debug!("File {}: load stopped, reader exiting", name);
            return Ok(());
        }
    }

    Ok(())
}
