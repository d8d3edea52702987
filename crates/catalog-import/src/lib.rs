//! # catalog-import
//!
//! Loads heterogeneous CSV product-catalog feeds into a single PostgreSQL
//! staging table.
//!
//! Every run drops and recreates the staging table, then streams each feed
//! file through the same pipeline:
//!
//! - **Header normalization**: raw column names are mapped to staging-table
//!   identifiers and a `partner_id` column is added when the feed lacks one
//! - **Row repair and batching**: rows are prefixed with the partner id where
//!   needed and grouped into fixed-size batches
//! - **Bulk loading**: each batch is encoded as CSV and sent with
//!   `COPY ... FROM STDIN`, per batch or per file transactions
//!
//! ## Example
//!
//! ```rust,no_run
//! use catalog_import::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> catalog_import::Result<()> {
//!     let config = Config::from_env()?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let report = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Loaded {} rows", report.rows_committed);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod orchestrator;
pub mod schema;
pub mod target;

// Re-exports for convenient access
pub use batch::{Batch, Batcher};
pub use config::{Config, DatabaseConfig, ImportConfig, LoadMode, LoggingConfig};
pub use error::{ImportError, Result};
pub use loader::{copy_statement, encode_batch, EncodedBatch};
pub use normalize::{normalize_header, NormalizedHeader};
pub use orchestrator::{FileOutcome, FileStatus, ImportReport, Orchestrator, RunStatus};
pub use schema::StagingTable;
pub use target::{LoadSession, PgTarget, StagingTarget};
