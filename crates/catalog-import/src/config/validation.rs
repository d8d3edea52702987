//! Configuration validation.

use super::Config;
use crate::error::{ImportError, Result};
use crate::target::tls::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Database validation
    if config.database.host.is_empty() {
        return Err(ImportError::Config("database.host (DB_HOST) is required".into()));
    }
    if config.database.database.is_empty() {
        return Err(ImportError::Config(
            "database.database (DB_DATABASE) is required".into(),
        ));
    }
    if config.database.user.is_empty() {
        return Err(ImportError::Config("database.user (DB_USER) is required".into()));
    }
    if config.database.schema.is_empty() {
        return Err(ImportError::Config("database.schema cannot be empty".into()));
    }
    SslMode::parse(&config.database.ssl_mode)?;

    // Import validation
    let import = &config.import;
    if import.staging_table.is_empty() {
        return Err(ImportError::Config("import.staging_table cannot be empty".into()));
    }
    if import.partner_id.trim().is_empty() {
        return Err(ImportError::Config(
            "import.partner_id (PARTNER_ID) is required".into(),
        ));
    }
    if import.partner_id.trim().parse::<i64>().is_err() {
        return Err(ImportError::Config(format!(
            "import.partner_id must be an integer, got '{}'",
            import.partner_id
        )));
    }
    if import.batch_size == 0 {
        return Err(ImportError::Config(
            "import.batch_size must be at least 1".into(),
        ));
    }
    if import.workers == 0 {
        return Err(ImportError::Config("import.workers must be at least 1".into()));
    }
    if import.pipeline_depth == 0 {
        return Err(ImportError::Config(
            "import.pipeline_depth must be at least 1".into(),
        ));
    }
    if import.copy_timeout_secs == 0 {
        return Err(ImportError::Config(
            "import.copy_timeout_secs must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, ImportConfig, LoadMode, LoggingConfig};
    use std::path::PathBuf;

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "catalog".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                ssl_mode: "disable".to_string(),
            },
            import: ImportConfig {
                input_dir: PathBuf::from("feeds"),
                staging_table: "awin_catalog_import_temp".to_string(),
                batch_size: 5000,
                partner_id: "42".to_string(),
                load_mode: LoadMode::BestEffort,
                workers: 1,
                pipeline_depth: 2,
                copy_timeout_secs: 600,
                fail_on_file_error: false,
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_database_host() {
        let mut config = valid_config();
        config.database.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.import.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_workers() {
        let mut config = valid_config();
        config.import.workers = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_partner_id_must_be_numeric() {
        let mut config = valid_config();
        config.import.partner_id = "awin".to_string();
        assert!(validate(&config).is_err());

        config.import.partner_id = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        config.database.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_database_config_debug_redacts_password() {
        let mut config = valid_config();
        config.database.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.database);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
