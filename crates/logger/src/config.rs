//! Logger configuration management

use crate::aggregator::AggregationMode;
use crate::context::Options;
use crate::event_loop::TimerSettings;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub timing: TimingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
    /// Log the raw bytes of every transfer
    #[serde(default)]
    pub verbose: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            verbose: false,
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Print CSV rows instead of human-readable lines
    #[serde(default)]
    pub csv: bool,
    /// Also write CSV rows to this file (`~` is expanded)
    #[serde(default)]
    pub file: Option<String>,
    /// Aggregation window in milliseconds; unset emits every report
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Only log the device with this serial number
    #[serde(default)]
    pub serial: Option<String>,
    /// Stop each device after this many records
    #[serde(default)]
    pub packet_target: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "TimingSettings::default_maintenance")]
    pub maintenance_interval_ms: u64,
    /// How long shutdown waits for cancelled transfers
    #[serde(default = "TimingSettings::default_cancel_fallback")]
    pub cancel_fallback_ms: u64,
    #[serde(default = "TimingSettings::default_transfer_timeout")]
    pub transfer_timeout_ms: u64,
    #[serde(default = "TimingSettings::default_poll_slice")]
    pub poll_slice_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            maintenance_interval_ms: Self::default_maintenance(),
            cancel_fallback_ms: Self::default_cancel_fallback(),
            transfer_timeout_ms: Self::default_transfer_timeout(),
            poll_slice_ms: Self::default_poll_slice(),
        }
    }
}

impl TimingSettings {
    fn default_maintenance() -> u64 {
        1000
    }

    fn default_cancel_fallback() -> u64 {
        1000
    }

    fn default_transfer_timeout() -> u64 {
        5000
    }

    fn default_poll_slice() -> u64 {
        10
    }
}

impl LoggerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/portpilot-logger/logger.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: LoggerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("portpilot-logger").join("logger.toml")
        } else {
            PathBuf::from(".config/portpilot-logger/logger.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if self.output.interval_ms == Some(0) {
            return Err(anyhow!("Output interval must be greater than 0"));
        }

        if self.device.packet_target == Some(0) {
            return Err(anyhow!("Packet target must be greater than 0"));
        }

        if let Some(serial) = &self.device.serial {
            if serial.is_empty() {
                return Err(anyhow!("Empty serial number filter"));
            }
        }

        if let Some(file) = &self.output.file {
            if file.is_empty() {
                return Err(anyhow!("Empty output file path"));
            }
        }

        let timing = [
            ("maintenance_interval_ms", self.timing.maintenance_interval_ms),
            ("cancel_fallback_ms", self.timing.cancel_fallback_ms),
            ("transfer_timeout_ms", self.timing.transfer_timeout_ms),
            ("poll_slice_ms", self.timing.poll_slice_ms),
        ];
        for (name, value) in timing {
            if value == 0 {
                return Err(anyhow!("Invalid timing.{}: must be greater than 0", name));
            }
        }

        Ok(())
    }

    /// Output file with `~` expanded
    pub fn output_file(&self) -> Option<PathBuf> {
        self.output
            .file
            .as_deref()
            .map(|file| PathBuf::from(shellexpand::tilde(file).as_ref()))
    }

    /// Core options for the logger context
    pub fn options(&self) -> Options {
        Options {
            serial_filter: self.device.serial.clone(),
            packet_target: self.device.packet_target,
            mode: AggregationMode::from_interval(self.output.interval_ms.map(Duration::from_millis)),
            verbose: self.logging.verbose,
            transfer_timeout: Duration::from_millis(self.timing.transfer_timeout_ms),
        }
    }

    /// Timer periods for the event loop
    pub fn timer_settings(&self) -> TimerSettings {
        TimerSettings {
            maintenance: Duration::from_millis(self.timing.maintenance_interval_ms),
            output: self.output.interval_ms.map(Duration::from_millis),
            cancel_fallback: Duration::from_millis(self.timing.cancel_fallback_ms),
            poll_slice: Duration::from_millis(self.timing.poll_slice_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggerConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(!config.output.csv);
        assert_eq!(config.output.interval_ms, None);
        assert_eq!(config.timing.maintenance_interval_ms, 1000);
        assert_eq!(config.timing.cancel_fallback_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = LoggerConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: LoggerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: LoggerConfig = toml::from_str("[output]\ncsv = true\n").unwrap();
        assert!(parsed.output.csv);
        assert_eq!(parsed.logging.level, "info");
        assert_eq!(parsed.timing, TimingSettings::default());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = LoggerConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = LoggerConfig::default();
        config.output.interval_ms = Some(0);
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.device.packet_target = Some(0);
        assert!(config.validate().is_err());

        let mut config = LoggerConfig::default();
        config.timing.cancel_fallback_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cancel_fallback_ms"));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = LoggerConfig::default();
        config.device.serial = Some("ABC123".to_string());
        config.device.packet_target = Some(10);
        config.output.interval_ms = Some(250);

        let options = config.options();
        assert_eq!(options.serial_filter.as_deref(), Some("ABC123"));
        assert_eq!(options.packet_target, Some(10));
        assert_eq!(
            options.mode,
            AggregationMode::Windowed {
                interval: Duration::from_millis(250)
            }
        );
        assert_eq!(options.transfer_timeout, Duration::from_millis(5000));

        let timers = config.timer_settings();
        assert_eq!(timers.output, Some(Duration::from_millis(250)));
        assert_eq!(timers.poll_slice, Duration::from_millis(10));
    }

    #[test]
    fn test_output_file_expands_tilde() {
        let mut config = LoggerConfig::default();
        assert_eq!(config.output_file(), None);

        config.output.file = Some("/tmp/log.csv".to_string());
        assert_eq!(config.output_file(), Some(PathBuf::from("/tmp/log.csv")));

        config.output.file = Some("~/log.csv".to_string());
        let expanded = config.output_file().unwrap();
        assert!(expanded.ends_with("log.csv"));
        if let Some(home) = dirs::home_dir() {
            assert!(expanded.starts_with(home));
        }
    }
}
