/// `load_config` module: builds the runtime [`AppConfig`] from an optional YAML file plus the environment.
///
/// The YAML file only ever holds non-secret settings (paths, bind address, retry tuning).
/// OAuth credentials always come from the environment, usually via a `.env` file loaded by `main`.
///
/// # Environment
/// - `MENDELEY_CLIENT_ID`, `MENDELEY_CLIENT_SECRET`: required.
/// - `MENDELEY_REFRESH_TOKEN`: optional here; without it every batch fails authentication.
/// - `MENDELEY_REDIRECT_URI`: defaults to `http://localhost:8585/callback`.
/// - `MENDELEY_UPLOAD_DIR`, `MENDELEY_API_BASE_URL`: override the YAML values.
///
/// # Errors
/// All errors use `anyhow::Error` and are logged before being returned to the CLI.
use anyhow::{Context, Result};
use mendeley_uploader_core::config::{BatchSettings, DEFAULT_DOCUMENT_TYPE};
use mendeley_uploader_core::retry::RetryPolicy;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_API_BASE_URL: &str = "https://api.mendeley.com";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8585/callback";
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_LEDGER_PATH: &str = "mendeley_uploads.jsonl";
pub const DEFAULT_LOG_FILE: &str = "mendeley_uploader.log";
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: Option<String>,
    pub redirect_uri: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub credentials: Credentials,
    /// Default target for batches that don't name a path.
    pub upload_dir: Option<PathBuf>,
    pub bind: SocketAddr,
    pub ledger_path: PathBuf,
    pub log_file: PathBuf,
    pub log_capacity: usize,
    pub batch: BatchSettings,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    api_base_url: Option<String>,
    upload_dir: Option<PathBuf>,
    bind: Option<String>,
    ledger_path: Option<PathBuf>,
    log_file: Option<PathBuf>,
    log_capacity: Option<usize>,
    document_type: Option<String>,
    polite_delay_ms: Option<u64>,
    skip_uploaded: Option<bool>,
    #[serde(default)]
    retry: RetrySection,
}

#[derive(Debug, Default, Deserialize)]
struct RetrySection {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required_env(name: &str) -> Result<String> {
    match env_var(name) {
        Some(value) => {
            info!(var = name, "Found in environment");
            Ok(value)
        }
        None => {
            error!(var = name, "Environment variable not set");
            Err(anyhow::anyhow!("{name} environment variable not set"))
        }
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    info!(config_path = ?path, "Loading configuration from file");

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path,
                e
            ));
        }
    };

    // An empty file is valid and means "all defaults".
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }

    match serde_yaml::from_str(&content) {
        Ok(conf) => {
            info!(config_path = ?path, "Parsed config YAML successfully");
            Ok(conf)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML: {e}"))
        }
    }
}

/// Loads the optional YAML file and merges in secrets and overrides from the environment.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let file = match path {
        Some(path) => read_file_config(path)?,
        None => FileConfig::default(),
    };

    let client_id = required_env("MENDELEY_CLIENT_ID")?;
    let client_secret = required_env("MENDELEY_CLIENT_SECRET")?;
    let refresh_token = env_var("MENDELEY_REFRESH_TOKEN");
    if refresh_token.is_none() {
        warn!("MENDELEY_REFRESH_TOKEN not set; uploads will fail until one is configured (see `authorize`)");
    }
    let redirect_uri =
        env_var("MENDELEY_REDIRECT_URI").unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());

    let api_base_url = env_var("MENDELEY_API_BASE_URL")
        .or(file.api_base_url)
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
        .trim_end_matches('/')
        .to_string();

    let upload_dir = env_var("MENDELEY_UPLOAD_DIR")
        .map(PathBuf::from)
        .or(file.upload_dir);

    let bind_raw = file.bind.unwrap_or_else(|| DEFAULT_BIND.to_string());
    let bind: SocketAddr = bind_raw
        .parse()
        .with_context(|| format!("Invalid bind address {bind_raw:?}"))
        .inspect_err(|e| error!(error = %e, "Invalid bind address in config"))?;

    let default_retry = RetryPolicy::default();
    let retry = RetryPolicy {
        max_attempts: file.retry.max_attempts.unwrap_or(default_retry.max_attempts),
        initial_backoff: file
            .retry
            .initial_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(default_retry.initial_backoff),
        max_backoff: file
            .retry
            .max_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(default_retry.max_backoff),
    };

    let batch = BatchSettings {
        document_type: file
            .document_type
            .unwrap_or_else(|| DEFAULT_DOCUMENT_TYPE.to_string()),
        polite_delay: file
            .polite_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(BatchSettings::default().polite_delay),
        skip_uploaded: file.skip_uploaded.unwrap_or(true),
        retry,
    };

    let config = AppConfig {
        api_base_url,
        credentials: Credentials {
            client_id,
            client_secret,
            refresh_token,
            redirect_uri,
        },
        upload_dir,
        bind,
        ledger_path: file
            .ledger_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_PATH)),
        log_file: file
            .log_file
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        log_capacity: file.log_capacity.unwrap_or(DEFAULT_LOG_CAPACITY).max(1),
        batch,
    };

    info!(
        api_base_url = %config.api_base_url,
        upload_dir = ?config.upload_dir,
        bind = %config.bind,
        ledger = %config.ledger_path.display(),
        "Config loaded and merged successfully"
    );
    config.batch.trace_loaded();
    Ok(config)
}
