//! Configuration for the vipertui key viewer.
//!
//! Loaded from `~/.vipertui/config.toml`. Every field has a default, and a
//! missing or unreadable file yields the defaults.
//!
//! ```toml
//! # trace | debug | info | warn | error
//! log_level = "info"
//!
//! [input]
//! esc_timeout_ms = 35
//! poll_interval_ms = 100
//! read_buffer = 1024
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ui::PumpConfig;

/// Bounds of the ESC idle window, in milliseconds.
pub const ESC_TIMEOUT_RANGE: (u64, u64) = (1, 1000);

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log filter used when `RUST_LOG` is not set
    pub log_level: String,
    /// Input handling
    pub input: InputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            input: InputConfig::default(),
        }
    }
}

/// Input configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub esc_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub read_buffer: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            esc_timeout_ms: 35,
            poll_interval_ms: 100,
            read_buffer: 1024,
        }
    }
}

impl InputConfig {
    pub fn esc_timeout(&self) -> Duration {
        let (lo, hi) = ESC_TIMEOUT_RANGE;
        Duration::from_millis(self.esc_timeout_ms.clamp(lo, hi))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            esc_timeout: self.esc_timeout(),
            read_buffer: self.read_buffer.max(1),
        }
    }
}

impl Config {
    /// Load configuration from `~/.vipertui/config.toml`
    pub fn load() -> Self {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from `path`, falling back to defaults.
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))
    }
}

/// `~/.vipertui`, where the config and log files live.
pub fn data_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".vipertui"))
}

fn config_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("config.toml"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
