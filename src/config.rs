//! Configuration loader and validator for the job-capture host.
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
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub capture: Capture,
}

/// App-level settings: where the web app and its API live, and where the
/// session database is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub web_app_url: String,
    pub api_base_url: String,
    pub data_dir: String,
}

/// Capture-pipeline timing knobs, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capture {
    /// Hard deadline for one page extraction; the save flow proceeds with
    /// sentinel fields once this elapses.
    pub extraction_timeout_ms: u64,
    /// Single bounded retry delay for late-attaching title/company nodes.
    pub retry_delay_ms: u64,
    /// Active-tab URL poll interval for the panel.
    pub url_poll_interval_ms: u64,
    /// How long the success message stays up before the form resets.
    pub form_reset_delay_ms: u64,
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
    if cfg.app.web_app_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.web_app_url must be non-empty"));
    }
    if cfg.app.api_base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.api_base_url must be non-empty"));
    }
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.capture.extraction_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "capture.extraction_timeout_ms must be > 0",
        ));
    }
    if cfg.capture.url_poll_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "capture.url_poll_interval_ms must be > 0",
        ));
    }
    // retry_delay_ms and form_reset_delay_ms may legitimately be 0 (tests).

    Ok(())
}

/// Example YAML configuration, kept in sync with the `Config` schema.
pub fn example() -> &'static str {
    r#"app:
  web_app_url: "https://app.jobscout.dev"
  api_base_url: "https://api.jobscout.dev"
  data_dir: "./data"

capture:
  extraction_timeout_ms: 5000
  retry_delay_ms: 200
  url_poll_interval_ms: 2000
  form_reset_delay_ms: 4000
"#
}
