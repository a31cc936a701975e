//! Integration tests for configuration files
//!
//! Loads, saves and validates logger configuration on disk, and checks
//! that file values reach the core options and timers.

use logger::config::LoggerConfig;
use logger::AggregationMode;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[logging]
level = "debug"
verbose = true

[output]
csv = true
file = "/var/log/portpilot.csv"
interval_ms = 250

[device]
serial = "PP000123"
packet_target = 100

[timing]
maintenance_interval_ms = 500
cancel_fallback_ms = 2000
transfer_timeout_ms = 3000
poll_slice_ms = 20
"#;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("logger.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_full_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, FULL_CONFIG);

    let config = LoggerConfig::load(Some(path)).unwrap();

    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.verbose);
    assert!(config.output.csv);
    assert_eq!(config.output.file.as_deref(), Some("/var/log/portpilot.csv"));
    assert_eq!(config.device.serial.as_deref(), Some("PP000123"));
    assert_eq!(config.device.packet_target, Some(100));
    assert_eq!(config.timing.poll_slice_ms, 20);

    let options = config.options();
    assert_eq!(
        options.mode,
        AggregationMode::Windowed {
            interval: Duration::from_millis(250)
        }
    );
    assert!(options.verbose);
    assert_eq!(options.transfer_timeout, Duration::from_millis(3000));

    let timers = config.timer_settings();
    assert_eq!(timers.maintenance, Duration::from_millis(500));
    assert_eq!(timers.cancel_fallback, Duration::from_millis(2000));
    assert_eq!(timers.output, Some(Duration::from_millis(250)));
}

#[test]
fn test_load_empty_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let config = LoggerConfig::load(Some(path)).unwrap();
    assert_eq!(config, LoggerConfig::default());
    assert_eq!(config.options().mode, AggregationMode::Immediate);
}

#[test]
fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("dir").join("logger.toml");

    let mut config = LoggerConfig::default();
    config.output.csv = true;
    config.device.packet_target = Some(42);
    config.save(&path).unwrap();

    assert!(path.exists());
    let loaded = LoggerConfig::load(Some(path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = LoggerConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[output\ncsv = true\n");

    let err = LoggerConfig::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_wrong_type_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[device]\npacket_target = \"ten\"\n");

    assert!(LoggerConfig::load(Some(path)).is_err());
}

#[test]
fn test_invalid_values_are_rejected_on_load() {
    let dir = TempDir::new().unwrap();

    let path = write_config(&dir, "[logging]\nlevel = \"loud\"\n");
    assert!(LoggerConfig::load(Some(path)).is_err());

    let path = write_config(&dir, "[output]\ninterval_ms = 0\n");
    assert!(LoggerConfig::load(Some(path)).is_err());

    let path = write_config(&dir, "[timing]\npoll_slice_ms = 0\n");
    let err = LoggerConfig::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("poll_slice_ms"));
}
