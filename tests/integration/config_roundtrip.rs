//! Config file persistence and validation.

use reminder_relay::config::{ConfigIssueSeverity, RelayConfig, RetryMode};
use reminder_relay::{RelayError, RelayRuntime};

#[test]
fn save_then_load_preserves_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = RelayConfig::default();
    config.scheduler.batch_size = 25;
    config.dispatch.retry_mode = RetryMode::Immediate;
    config.delivery.email.api_url = Some("https://mail.example.com/send".to_owned());
    config.save_to_file(&path).unwrap();

    let loaded = RelayConfig::from_file(&path).unwrap();
    assert_eq!(loaded.scheduler.batch_size, 25);
    assert_eq!(loaded.dispatch.retry_mode, RetryMode::Immediate);
    assert_eq!(
        loaded.delivery.email.api_url.as_deref(),
        Some("https://mail.example.com/send")
    );
}

#[test]
fn partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[scheduler]\ntick_interval_secs = 15\n\n[delivery]\ndry_run = true\n",
    )
    .unwrap();

    let config = RelayConfig::from_file(&path).unwrap();
    assert_eq!(config.scheduler.tick_interval_secs, 15);
    assert_eq!(config.scheduler.batch_size, 50);
    assert_eq!(config.scheduler.lock_timeout_secs, 900);
    assert!(config.delivery.dry_run);
    assert!(config.validate().is_empty(), "{:?}", config.validate());
}

#[test]
fn malformed_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[scheduler\nbatch_size = ").unwrap();
    assert!(matches!(
        RelayConfig::from_file(&path),
        Err(RelayError::Config(_))
    ));
}

#[test]
fn zero_workers_is_reported_as_error() {
    let mut config = RelayConfig::default();
    config.delivery.dry_run = true;
    config.workers.concurrency = 0;
    let issues = config.validate();
    assert!(
        issues
            .iter()
            .any(|i| i.id == "workers-none" && i.severity == ConfigIssueSeverity::Error)
    );
}

#[test]
fn runtime_opens_database_under_new_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RelayConfig::default();
    config.store.db_path = dir.path().join("data").join("relay.db");
    config.delivery.dry_run = true;

    let runtime = RelayRuntime::from_config(config).unwrap();
    assert!(dir.path().join("data").join("relay.db").exists());
    assert_eq!(runtime.store().schema_version().unwrap(), Some(1));
}
