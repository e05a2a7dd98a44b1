//! Integration tests for logging setup
//!
//! A global subscriber can only be installed once per process, so a single
//! test here calls `init_logging`.

use fhir_jobqueue::config::{load_config_from_str, LoggingConfig};
use fhir_jobqueue::domain::QueueType;
use fhir_jobqueue::logging::{init_logging, parse_log_level};
use tempfile::TempDir;
use tracing::Level;

#[test]
fn test_logging_config_defaults() {
    let config = LoggingConfig::default();

    assert!(config.local_enabled);
    assert_eq!(config.local_path, "/var/log/fhir-jobqueue");
    assert_eq!(config.local_rotation, "daily");
    assert!(!config.console_json);
}

#[test]
fn test_invalid_rotation_rejected() {
    let result = load_config_from_str(
        r#"
database_target = "memory"

[logging]
local_rotation = "weekly"
"#,
    );

    let err = result.unwrap_err();
    assert!(err.to_string().contains("local_rotation"));
}

#[test]
fn test_parse_log_level_from_cli() {
    assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
    assert!(parse_log_level("verbose").is_err());
}

#[test]
fn test_init_logging_creates_log_directory() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("logs");
    let config = LoggingConfig {
        local_enabled: true,
        local_path: log_dir.to_string_lossy().into_owned(),
        local_rotation: "never".to_string(),
        console_json: false,
    };

    let guard = init_logging("debug", &config).expect("Failed to initialize logging");
    assert!(log_dir.is_dir());

    tracing::info!(queue_type = %QueueType::Export, "Logging test event");

    // A second subscriber is refused rather than silently replacing the first
    assert!(init_logging("info", &config).is_err());

    drop(guard);
}
