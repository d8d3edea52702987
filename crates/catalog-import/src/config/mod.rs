//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{ImportError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// Unset or blank variables fall back to their defaults; required ones
    /// (`DB_HOST`, `DB_USER`, `DB_DATABASE`, `PARTNER_ID`) fail validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database = DatabaseConfig {
            host: var("DB_HOST").unwrap_or_default(),
            port: parse_var(&var, "DB_PORT")?.unwrap_or_else(default_pg_port),
            database: var("DB_DATABASE").unwrap_or_default(),
            user: var("DB_USER").unwrap_or_default(),
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            schema: var("DB_SCHEMA").unwrap_or_else(default_public_schema),
            ssl_mode: var("DB_SSL_MODE").unwrap_or_else(default_disable),
        };

        let load_mode = match var("LOAD_MODE") {
            Some(raw) => LoadMode::parse(&raw).ok_or_else(|| {
                ImportError::Config(format!(
                    "LOAD_MODE must be 'best_effort' or 'per_file', got '{}'",
                    raw
                ))
            })?,
            None => LoadMode::default(),
        };

        let import = ImportConfig {
            input_dir: var("INPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_input_dir),
            staging_table: var("STAGING_TABLE").unwrap_or_else(default_staging_table),
            batch_size: parse_var(&var, "BATCH_SIZE")?.unwrap_or_else(default_batch_size),
            partner_id: var("PARTNER_ID")
                .or_else(|| var("AWIN_PARTNER_ID"))
                .unwrap_or_default(),
            load_mode,
            workers: parse_var(&var, "WORKERS")?.unwrap_or_else(default_workers),
            pipeline_depth: parse_var(&var, "PIPELINE_DEPTH")?
                .unwrap_or_else(default_pipeline_depth),
            copy_timeout_secs: parse_var(&var, "COPY_TIMEOUT_SECS")?
                .unwrap_or_else(default_copy_timeout_secs),
            fail_on_file_error: parse_flag(&var, "FAIL_ON_FILE_ERROR")?.unwrap_or(false),
        };

        let logging = LoggingConfig {
            dir: var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_log_dir),
            level: var("LOG_LEVEL").unwrap_or_else(default_log_level),
        };

        let config = Config {
            database,
            import,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl ImportConfig {
    /// Per-batch COPY deadline.
    pub fn copy_timeout(&self) -> Duration {
        Duration::from_secs(self.copy_timeout_secs)
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ImportError::Config(format!("{} has an invalid value: '{}'", key, raw))
        }),
        None => Ok(None),
    }
}

fn parse_flag<F>(var: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => Err(ImportError::Config(format!(
                "{} must be true or false, got '{}'",
                key, raw
            ))),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DB_HOST", "db.internal"),
            ("DB_USER", "loader"),
            ("DB_PASSWORD", "secret"),
            ("DB_DATABASE", "catalog"),
            ("PARTNER_ID", "42"),
        ]
    }

    #[test]
    fn test_from_lookup_applies_defaults() {
        let vars = env(&required());
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.schema, "public");
        assert_eq!(config.import.batch_size, 5000);
        assert_eq!(config.import.partner_id, "42");
        assert_eq!(config.import.load_mode, LoadMode::BestEffort);
        assert_eq!(config.import.workers, 1);
        assert_eq!(config.import.staging_table, "awin_catalog_import_temp");
        assert!(!config.import.fail_on_file_error);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let mut pairs = required();
        pairs.extend([
            ("DB_PORT", "6543"),
            ("BATCH_SIZE", "250"),
            ("LOAD_MODE", "per-file"),
            ("WORKERS", "3"),
            ("FAIL_ON_FILE_ERROR", "yes"),
            ("INPUT_DIR", "/srv/feeds"),
        ]);
        let vars = env(&pairs);
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.database.port, 6543);
        assert_eq!(config.import.batch_size, 250);
        assert_eq!(config.import.load_mode, LoadMode::PerFile);
        assert_eq!(config.import.workers, 3);
        assert!(config.import.fail_on_file_error);
        assert_eq!(config.import.input_dir, PathBuf::from("/srv/feeds"));
    }

    #[test]
    fn test_legacy_partner_variable_is_accepted() {
        let pairs: Vec<_> = required()
            .into_iter()
            .filter(|(k, _)| *k != "PARTNER_ID")
            .chain([("AWIN_PARTNER_ID", "77")])
            .collect();
        let vars = env(&pairs);
        let config = Config::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.import.partner_id, "77");
    }

    #[test]
    fn test_non_numeric_batch_size_is_rejected() {
        let mut pairs = required();
        pairs.push(("BATCH_SIZE", "lots"));
        let vars = env(&pairs);
        let err = Config::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }

    #[test]
    fn test_missing_host_is_rejected() {
        let pairs: Vec<_> = required()
            .into_iter()
            .filter(|(k, _)| *k != "DB_HOST")
            .collect();
        let vars = env(&pairs);
        assert!(Config::from_lookup(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
database:
  host: localhost
  database: catalog
  user: postgres
  password: postgres
import:
  partner_id: "42"
  batch_size: 1000
  load_mode: per_file
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.import.batch_size, 1000);
        assert_eq!(config.import.load_mode, LoadMode::PerFile);
        assert_eq!(config.import.pipeline_depth, 2);
        assert_eq!(config.logging.dir, PathBuf::from("data/log"));
    }
}
