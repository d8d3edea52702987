//! Error types for the catalog import library.

use thiserror::Error;

/// Exit code for configuration errors (bad YAML, missing variables, invalid values).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for database connectivity errors.
pub const EXIT_DATABASE_ERROR: u8 = 2;
/// Exit code when the staging table could not be reset.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Exit code when files failed and `fail_on_file_error` is set.
pub const EXIT_FILES_FAILED: u8 = 4;
/// Exit code for a timed out database operation.
pub const EXIT_TIMEOUT: u8 = 5;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for feed parse and per-file load errors.
pub const EXIT_FEED_ERROR: u8 = 8;

/// Main error type for import operations.
#[derive(Error, Debug)]
pub enum ImportError {
    /// Configuration error (invalid YAML, missing variables, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Dropping or recreating the staging table failed
    #[error("Failed to reset staging table {table}: {message}")]
    SchemaReset { table: String, message: String },

    /// Feed file could not be parsed as CSV
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Loading a specific feed file failed
    #[error("Load failed for file {file}: {message}")]
    File { file: String, message: String },

    /// A database operation exceeded its deadline
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Import was cancelled (SIGINT, etc.)
    #[error("Import cancelled")]
    Cancelled,

    /// One or more files failed and the run is configured to escalate it
    #[error("{failed} of {total} feed files failed to load")]
    FilesFailed { failed: usize, total: usize },
}

impl ImportError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        ImportError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a File error
    pub fn file(file: impl Into<String>, message: impl Into<String>) -> Self {
        ImportError::File {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the database connection itself is gone.
    ///
    /// Connection failures abort the whole run; anything else is scoped to
    /// the file being loaded.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            ImportError::Pool { .. } => true,
            ImportError::Database(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ImportError::Config(_) | ImportError::Yaml(_) | ImportError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            ImportError::Database(_) | ImportError::Pool { .. } => EXIT_DATABASE_ERROR,
            ImportError::SchemaReset { .. } => EXIT_SCHEMA_ERROR,
            ImportError::FilesFailed { .. } => EXIT_FILES_FAILED,
            ImportError::Timeout { .. } => EXIT_TIMEOUT,
            ImportError::Cancelled => EXIT_CANCELLED,
            ImportError::Io(_) => EXIT_IO_ERROR,
            ImportError::Csv(_) | ImportError::File { .. } => EXIT_FEED_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_connection_failures() {
        let err = ImportError::pool("timed out", "getting connection");
        assert!(err.is_connection_failure());
        assert_eq!(err.exit_code(), EXIT_DATABASE_ERROR);
    }

    #[test]
    fn test_file_errors_are_not_connection_failures() {
        let err = ImportError::file("feed.csv", "COPY rejected");
        assert!(!err.is_connection_failure());
        assert_eq!(err.exit_code(), EXIT_FEED_ERROR);
        assert_eq!(err.to_string(), "Load failed for file feed.csv: COPY rejected");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ImportError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            ImportError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")).exit_code(),
            EXIT_IO_ERROR
        );
        assert_eq!(ImportError::Cancelled.exit_code(), EXIT_CANCELLED);
        assert_eq!(
            ImportError::FilesFailed { failed: 1, total: 3 }.exit_code(),
            EXIT_FILES_FAILED
        );
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = ImportError::SchemaReset {
            table: "public.staging".into(),
            message: "permission denied".into(),
        };
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Failed to reset staging table public.staging"));
    }
}
