use std::fs;
use std::time::Duration;

use tinytorrent_config::{ConfigError, RecoveryProfile, normalize_recovery_profile};
use tinytorrent_recovery_core::HostMode;

#[test]
fn profile_file_with_env_overrides_normalises() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("recovery.json");
    fs::write(
        &path,
        r#"{
            "host_mode": "remote",
            "base_interval_ms": 250,
            "settle_multiplier": 8,
            "log_format": "json"
        }"#,
    )?;

    let mut profile = RecoveryProfile::from_path(&path)?;
    profile.apply_env([("TINYTORRENT_PROBE_INTERVAL_MS", "20")])?;
    let effective = normalize_recovery_profile(&profile);

    assert_eq!(effective.host_mode, HostMode::Remote);
    assert_eq!(effective.settle_timeout(), Duration::from_secs(2));
    assert_eq!(effective.probe_interval, Duration::from_millis(250));
    assert_eq!(effective.logging.format.as_deref(), Some("json"));
    assert_eq!(effective.warnings.len(), 1);
    Ok(())
}

#[test]
fn missing_profile_file_reports_io_error() {
    let err = RecoveryProfile::from_path("/definitely/missing/recovery.json")
        .expect_err("missing file");
    assert!(matches!(
        err,
        ConfigError::Io {
            operation: "config.read",
            ..
        }
    ));
}

#[test]
fn invalid_profile_file_reports_its_path() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.json");
    fs::write(&path, r#"{"settle_multiplier": -1}"#)?;

    let err = RecoveryProfile::from_path(&path).expect_err("negative multiplier");
    match err {
        ConfigError::Parse { origin, .. } => assert!(origin.ends_with("broken.json")),
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}
