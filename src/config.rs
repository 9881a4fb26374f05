//! Configuration loader and validator for the kiosk reconciliation service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub drive: Drive,
    pub payments: Payments,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub data_dir: String,
    /// How often the job worker polls for pending rows.
    pub poll_interval_ms: u64,
    /// How often sync jobs are enqueued for every mapped kiosk. This stands
    /// in for the platform cron trigger.
    pub reconcile_interval_secs: u64,
}

/// Remote drive API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Drive {
    pub api_base: String,
    pub upload_base: String,
    pub access_token: String,
    /// Base URL for assets whose bytes live in platform object storage;
    /// joined with `file_path` when no explicit URL is stored.
    pub storage_public_base: String,
}

/// Commission settings for the split calculator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payments {
    /// Percentage applied when an assignment carries no rate of its own.
    pub default_commission_rate: f64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.reconcile_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "app.reconcile_interval_secs must be > 0",
        ));
    }

    if cfg.drive.api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("drive.api_base must be non-empty"));
    }
    if cfg.drive.upload_base.trim().is_empty() {
        return Err(ConfigError::Invalid("drive.upload_base must be non-empty"));
    }
    if cfg.drive.access_token.trim().is_empty() {
        return Err(ConfigError::Invalid("drive.access_token must be non-empty"));
    }

    if !(0.0..=100.0).contains(&cfg.payments.default_commission_rate) {
        return Err(ConfigError::Invalid(
            "payments.default_commission_rate must be within [0,100]",
        ));
    }

    Ok(())
}

/// Complete sample configuration document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500
  reconcile_interval_secs: 3600

drive:
  api_base: "https://www.googleapis.com/drive/v3/"
  upload_base: "https://www.googleapis.com/upload/drive/v3/"
  access_token: "YOUR_DRIVE_ACCESS_TOKEN"
  storage_public_base: "https://storage.example.com/media"

payments:
  default_commission_rate: 70.0
"#
}
