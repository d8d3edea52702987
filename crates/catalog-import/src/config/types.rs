//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Destination database (PostgreSQL).
    pub database: DatabaseConfig,

    /// Import behavior.
    pub import: ImportConfig,

    /// Log file location and verbosity.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Destination database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding the staging table (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Import behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Directory scanned for `*.csv` feed files.
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Staging table that is dropped and recreated on every run.
    #[serde(default = "default_staging_table")]
    pub staging_table: String,

    /// Rows per COPY batch (default: 5000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Value injected into `partner_id` when a feed does not carry it.
    pub partner_id: String,

    /// Transaction boundary for loaded rows (default: best_effort).
    #[serde(default)]
    pub load_mode: LoadMode,

    /// Files loaded concurrently, each on its own connection (default: 1).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Encoded batches buffered ahead of the COPY loop per file (default: 2).
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,

    /// Deadline for a single batch COPY, in seconds (default: 600).
    #[serde(default = "default_copy_timeout_secs")]
    pub copy_timeout_secs: u64,

    /// Return a failing exit status when any file failed (default: false).
    #[serde(default)]
    pub fail_on_file_error: bool,
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory receiving one log file per run.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// Log level: debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

/// Where transactions begin and end while loading a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Every batch commits on its own. A file that fails mid-stream keeps
    /// the batches already committed.
    #[default]
    BestEffort,

    /// One transaction per file, rolled back if any batch fails.
    PerFile,
}

impl LoadMode {
    /// Parse a load mode from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "best_effort" => Some(LoadMode::BestEffort),
            "per_file" => Some(LoadMode::PerFile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::BestEffort => "best_effort",
            LoadMode::PerFile => "per_file",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Default value functions for serde
pub(crate) fn default_pg_port() -> u16 {
    5432
}

pub(crate) fn default_public_schema() -> String {
    "public".to_string()
}

pub(crate) fn default_disable() -> String {
    "disable".to_string()
}

pub(crate) fn default_input_dir() -> PathBuf {
    PathBuf::from("data/csv")
}

pub(crate) fn default_staging_table() -> String {
    "awin_catalog_import_temp".to_string()
}

pub(crate) fn default_batch_size() -> usize {
    crate::batch::DEFAULT_BATCH_SIZE
}

pub(crate) fn default_workers() -> usize {
    1
}

pub(crate) fn default_pipeline_depth() -> usize {
    2
}

pub(crate) fn default_copy_timeout_secs() -> u64 {
    600
}

pub(crate) fn default_log_dir() -> PathBuf {
    PathBuf::from("data/log")
}

pub(crate) fn default_log_level() -> String {
    "info".to_string()
}
