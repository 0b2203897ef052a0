use serial_test::serial;
use std::env;
use std::fs::write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

use mendeley_uploader::load_config::{load_config, DEFAULT_API_BASE_URL, DEFAULT_REDIRECT_URI};

const ALL_VARS: &[&str] = &[
    "MENDELEY_CLIENT_ID",
    "MENDELEY_CLIENT_SECRET",
    "MENDELEY_REFRESH_TOKEN",
    "MENDELEY_REDIRECT_URI",
    "MENDELEY_UPLOAD_DIR",
    "MENDELEY_API_BASE_URL",
];

fn reset_env() {
    for var in ALL_VARS {
        env::remove_var(var);
    }
    env::set_var("MENDELEY_CLIENT_ID", "client-123");
    env::set_var("MENDELEY_CLIENT_SECRET", "secret-456");
}

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

#[test]
#[serial]
fn test_defaults_without_config_file() {
    reset_env();
    env::set_var("MENDELEY_REFRESH_TOKEN", "refresh-789");

    let config = load_config(None).expect("Config should load");

    assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    assert_eq!(config.credentials.client_id, "client-123");
    assert_eq!(config.credentials.client_secret, "secret-456");
    assert_eq!(config.credentials.refresh_token.as_deref(), Some("refresh-789"));
    assert_eq!(config.credentials.redirect_uri, DEFAULT_REDIRECT_URI);
    assert_eq!(config.upload_dir, None);
    assert_eq!(config.bind, "127.0.0.1:8000".parse::<SocketAddr>().unwrap());
    assert_eq!(config.ledger_path, PathBuf::from("mendeley_uploads.jsonl"));
    assert_eq!(config.log_file, PathBuf::from("mendeley_uploader.log"));
    assert_eq!(config.log_capacity, 1000);
    assert_eq!(config.batch.document_type, "book");
    assert_eq!(config.batch.polite_delay, Duration::from_secs(1));
    assert!(config.batch.skip_uploaded);
    assert_eq!(config.batch.retry.max_attempts, 5);
}

#[test]
#[serial]
fn test_yaml_values_are_applied() {
    reset_env();
    let file = config_file(
        r#"
api_base_url: "http://localhost:9999/"
upload_dir: ./papers
bind: "0.0.0.0:8123"
ledger_path: ./state/ledger.jsonl
log_file: ./state/run.log
log_capacity: 50
document_type: journal
polite_delay_ms: 0
skip_uploaded: false
retry:
  max_attempts: 2
  initial_backoff_ms: 10
"#,
    );

    let config = load_config(Some(file.path())).expect("Config should load");

    assert_eq!(config.api_base_url, "http://localhost:9999");
    assert_eq!(config.upload_dir, Some(PathBuf::from("./papers")));
    assert_eq!(config.bind.port(), 8123);
    assert_eq!(config.ledger_path, PathBuf::from("./state/ledger.jsonl"));
    assert_eq!(config.log_capacity, 50);
    assert_eq!(config.batch.document_type, "journal");
    assert_eq!(config.batch.polite_delay, Duration::ZERO);
    assert!(!config.batch.skip_uploaded);
    assert_eq!(config.batch.retry.max_attempts, 2);
    assert_eq!(config.batch.retry.initial_backoff, Duration::from_millis(10));
    assert_eq!(config.batch.retry.max_backoff, Duration::from_secs(60));
}

#[test]
#[serial]
fn test_environment_overrides_yaml() {
    reset_env();
    env::set_var("MENDELEY_UPLOAD_DIR", "/data/pdfs");
    env::set_var("MENDELEY_API_BASE_URL", "http://mock.local");
    env::set_var("MENDELEY_REDIRECT_URI", "http://localhost:1234/cb");
    let file = config_file("upload_dir: ./ignored\napi_base_url: http://also-ignored\n");

    let config = load_config(Some(file.path())).expect("Config should load");

    assert_eq!(config.upload_dir, Some(PathBuf::from("/data/pdfs")));
    assert_eq!(config.api_base_url, "http://mock.local");
    assert_eq!(config.credentials.redirect_uri, "http://localhost:1234/cb");
}

#[test]
#[serial]
fn test_empty_file_means_defaults() {
    reset_env();
    let file = config_file("   \n");
    let config = load_config(Some(file.path())).expect("Config should load");
    assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
}

#[test]
#[serial]
fn test_missing_client_id_is_an_error() {
    reset_env();
    env::remove_var("MENDELEY_CLIENT_ID");
    let err = load_config(None).unwrap_err();
    assert!(
        err.to_string()
            .contains("MENDELEY_CLIENT_ID environment variable not set"),
        "unexpected error: {err}"
    );
}

#[test]
#[serial]
fn test_blank_secret_counts_as_missing() {
    reset_env();
    env::set_var("MENDELEY_CLIENT_SECRET", "  ");
    let err = load_config(None).unwrap_err();
    assert!(err.to_string().contains("MENDELEY_CLIENT_SECRET"));
}

#[test]
#[serial]
fn test_missing_refresh_token_still_loads() {
    reset_env();
    let config = load_config(None).expect("Config should load");
    assert!(config.credentials.refresh_token.is_none());
}

#[test]
#[serial]
fn test_secrets_are_redacted_in_debug_output() {
    reset_env();
    env::set_var("MENDELEY_REFRESH_TOKEN", "refresh-789");
    let config = load_config(None).unwrap();
    let debug = format!("{config:?}");
    assert!(!debug.contains("secret-456"));
    assert!(!debug.contains("refresh-789"));
    assert!(debug.contains("client-123"));
}

#[test]
#[serial]
fn test_invalid_yaml_and_bind_are_errors() {
    reset_env();
    let bad_yaml = config_file("bind: [unterminated\n");
    let err = load_config(Some(bad_yaml.path())).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config YAML"));

    let bad_bind = config_file("bind: not-an-address\n");
    let err = load_config(Some(bad_bind.path())).unwrap_err();
    assert!(err.to_string().contains("Invalid bind address"));
}

#[test]
#[serial]
fn test_unreadable_config_file_is_an_error() {
    reset_env();
    let err = load_config(Some(std::path::Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
