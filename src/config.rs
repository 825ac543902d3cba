//! Configuration loader for the `epi-sentinel` service and ETL tool.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Both binaries read the same snapshot so the ETL
//! and the API agree on disease id, confirmed-status code and model paths.
//!
use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::{anyhow, Result};

use crate::ingest::IngestOptions;

/// Parse an optional environment variable into `$ty` with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Address the HTTP API binds to.
    pub bind_addr: SocketAddr,

    /// Disease identifier stamped on every loaded observation.
    pub disease_id: i32,

    /// `ESTATUS_CASO` value that marks a confirmed case.
    pub confirmed_status: i64,

    /// Largest plausible single-region single-month count in monthly tables.
    pub monthly_case_ceiling: i64,

    /// Directory scanned for source CSVs when no files are given.
    pub data_dir: PathBuf,

    /// Classifier artifact (JSON forest).
    pub classifier_model: PathBuf,

    /// Regressor artifact (JSON forest).
    pub regressor_model: PathBuf,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `BIND_ADDR` – API listen address (default: `0.0.0.0:8080`)
/// - `DISEASE_ID` – disease id for loaded rows (default: 1)
/// - `CONFIRMED_STATUS` – confirmed status code (default: 1)
/// - `MONTHLY_CASE_CEILING` – monthly sanity ceiling (default: 50000)
/// - `DATA_DIR` – source CSV directory (default: `data`)
/// - `CLASSIFIER_MODEL` – classifier artifact (default: `models/classifier.json`)
/// - `REGRESSOR_MODEL` – regressor artifact (default: `models/regressor.json`)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env!("DB_POOL_MAX", u32, 5);
    let bind_addr = parse_env!("BIND_ADDR", SocketAddr, SocketAddr::from(([0, 0, 0, 0], 8080)));
    let disease_id = parse_env!("DISEASE_ID", i32, 1);
    let confirmed_status = parse_env!("CONFIRMED_STATUS", i64, 1);
    let monthly_case_ceiling = parse_env!("MONTHLY_CASE_CEILING", i64, 50_000);
    let data_dir = parse_env!("DATA_DIR", PathBuf, PathBuf::from("data"));
    let classifier_model = parse_env!(
        "CLASSIFIER_MODEL",
        PathBuf,
        PathBuf::from("models/classifier.json")
    );
    let regressor_model = parse_env!(
        "REGRESSOR_MODEL",
        PathBuf,
        PathBuf::from("models/regressor.json")
    );

    if monthly_case_ceiling <= 0 {
        return Err(anyhow!("Invalid MONTHLY_CASE_CEILING: must be positive"));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        bind_addr,
        disease_id,
        confirmed_status,
        monthly_case_ceiling,
        data_dir,
        classifier_model,
        regressor_model,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL         : {}", self.masked_db_url());
        tracing::info!("  DB_POOL_MAX          : {}", self.db_pool_max);
        tracing::info!("  BIND_ADDR            : {}", self.bind_addr);
        tracing::info!("  DISEASE_ID           : {}", self.disease_id);
        tracing::info!("  CONFIRMED_STATUS     : {}", self.confirmed_status);
        tracing::info!("  MONTHLY_CASE_CEILING : {}", self.monthly_case_ceiling);
        tracing::info!("  DATA_DIR             : {}", self.data_dir.display());
        tracing::info!("  CLASSIFIER_MODEL     : {}", self.classifier_model.display());
        tracing::info!("  REGRESSOR_MODEL      : {}", self.regressor_model.display());
    }

    /// Database URL with the password replaced by `****`.
    pub fn masked_db_url(&self) -> String {
        // ---
        if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                // `postgres://host@...` has its only colon in the scheme
                if !self.db_url[..colon_pos].ends_with("postgres")
                    && !self.db_url[..colon_pos].ends_with("postgresql")
                {
                    return format!(
                        "{}:****{}",
                        &self.db_url[..colon_pos],
                        &self.db_url[at_pos..]
                    );
                }
            }
        }
        self.db_url.clone()
    }

    /// Ingest knobs derived from this configuration.
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            confirmed_status: self.confirmed_status,
            monthly_case_ceiling: self.monthly_case_ceiling,
            year: None,
        }
    }

    /// Defaults without touching the environment.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Config {
        Config {
            db_url: "postgres://localhost/epi".to_string(),
            db_pool_max: 5,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            disease_id: 1,
            confirmed_status: 1,
            monthly_case_ceiling: 50_000,
            data_dir: PathBuf::from("data"),
            classifier_model: PathBuf::from("models/classifier.json"),
            regressor_model: PathBuf::from("models/regressor.json"),
        }
    }
}
