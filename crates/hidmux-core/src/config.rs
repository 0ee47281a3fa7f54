//! Configuration resolution for hidmux.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/hidmux/settings.json)
//! 3. Explicit config file (e.g. `--config` on the daemon)
//! 4. Environment variables (highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Largest report a control transaction may carry.
pub const HID_MAX_BUFFER_SIZE: usize = 4096;

/// Complete hidmux configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Device table and session buffer sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// Number of device slots.
    pub max_devices: usize,
    /// Events buffered per session. Must be a power of two.
    pub ring_capacity: usize,
    /// Upper bound on a control report, in bytes.
    pub max_report_size: usize,
    /// Serial numbers longer than this (minus the terminator) are truncated.
    pub max_serial_len: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            max_devices: 64,
            ring_capacity: 64,
            max_report_size: HID_MAX_BUFFER_SIZE,
            max_serial_len: 256,
        }
    }
}

/// Periodic diagnostic task for the primary device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    /// Delay between two ticks (milliseconds).
    pub interval_ms: u64,
    /// Sessions tracked at most; extra sessions are simply not tracked.
    pub max_entries: usize,
    /// Feature report requested on every tick.
    pub diagnostic_report_id: u8,
    pub diagnostic_report_len: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2000,
            max_entries: 32,
            diagnostic_report_id: 0x31,
            diagnostic_report_len: 24,
        }
    }
}

impl MonitorConfig {
    /// Tick interval as a `Duration`.
    pub const fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.interval_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Reject settings the multiplexer cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mux = &self.multiplexer;
        if mux.max_devices == 0 {
            return Err(Error::Config("multiplexer.max_devices must be at least 1".into()));
        }
        if mux.ring_capacity < 2 || !mux.ring_capacity.is_power_of_two() {
            return Err(Error::Config(format!(
                "multiplexer.ring_capacity must be a power of two >= 2, got {}",
                mux.ring_capacity
            )));
        }
        if mux.max_report_size < 2 {
            return Err(Error::Config(format!(
                "multiplexer.max_report_size must be at least 2, got {}",
                mux.max_report_size
            )));
        }
        if self.monitor.interval_ms == 0 {
            return Err(Error::Config("monitor.interval_ms must be non-zero".into()));
        }
        if self.monitor.diagnostic_report_len < 2
            || self.monitor.diagnostic_report_len > mux.max_report_size
        {
            return Err(Error::Config(format!(
                "monitor.diagnostic_report_len must lie in 2..={}, got {}",
                mux.max_report_size, self.monitor.diagnostic_report_len
            )));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        debug!(path = %global_path.display(), "Loading global config");
        config = load_config_file(&global_path)?;
    }

    // Load explicit config; a missing explicit file is an error
    if let Some(path) = explicit {
        debug!(path = %path.display(), "Loading config file");
        config = load_config_file(path)?;
    }

    apply_env_overrides(&mut config);
    config.validate()?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
        .map(|p| p.join("hidmux").join("settings.json"))
}

/// Parse a single settings file, without the global file or env overrides.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("HIDMUX_MAX_DEVICES").and_then(|v| v.parse().ok()) {
        config.multiplexer.max_devices = n;
    }
    if let Some(n) = lookup("HIDMUX_RING_CAPACITY").and_then(|v| v.parse().ok()) {
        config.multiplexer.ring_capacity = n;
    }
    if let Some(n) = lookup("HIDMUX_MAX_REPORT_SIZE").and_then(|v| v.parse().ok()) {
        config.multiplexer.max_report_size = n;
    }
    if let Some(n) = lookup("HIDMUX_MONITOR_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.monitor.interval_ms = n;
    }
    if let Some(b) = lookup("HIDMUX_MONITOR_ENABLED").and_then(|v| v.parse().ok()) {
        config.monitor.enabled = b;
    }
    if let Some(level) = lookup("HIDMUX_LOG_LEVEL") {
        config.log.level = level;
    }
}
