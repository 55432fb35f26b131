use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::HeadsetOptions;
use crate::error::{Error, Result};
use crate::protocol::commands::HANDS_FREE_DEFAULT_PORT;

/// Application configuration stored as TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Selected device Bluetooth address.
    pub device_address: Option<String>,
    /// Selected device name.
    pub device_name: Option<String>,
    pub connect_timeout_secs: u64,
    /// Upper bound on one battery session.
    pub battery_timeout_secs: u64,
    /// RFCOMM channel for the AT session when SDP has no hands-free record.
    pub battery_fallback_port: u8,
    pub poll_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            device_name: None,
            connect_timeout_secs: 5,
            battery_timeout_secs: 15,
            battery_fallback_port: HANDS_FREE_DEFAULT_PORT,
            poll_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Config file path: ~/.config/sonyctl/config.toml
    pub fn path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sonyctl");
        config_dir.join("config.toml")
    }

    /// Load config from disk, or return defaults.
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Failed to parse config: {}", e),
                },
                Err(e) => tracing::warn!("Failed to read config: {}", e),
            }
        }
        Self::default()
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        tracing::info!("Config saved to {}", path.display());
        Ok(())
    }

    /// Persist `address`/`name` as the selected device.
    pub fn select_device(&mut self, address: bluer::Address, name: Option<String>) {
        self.device_address = Some(address.to_string());
        self.device_name = name;
    }

    pub fn selected_address(&self) -> Option<bluer::Address> {
        let raw = self.device_address.as_deref()?;
        match raw.parse() {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!("Ignoring invalid configured address '{}': {}", raw, e);
                None
            }
        }
    }

    pub fn headset_options(&self) -> HeadsetOptions {
        HeadsetOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            battery_fallback_port: self.battery_fallback_port,
        }
    }

    pub fn battery_timeout(&self) -> Duration {
        Duration::from_secs(self.battery_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
