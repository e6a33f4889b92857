//! Persisted device settings (Wi-Fi credentials and assistant API key)
//!
//! Written by the configuration portal, read once at startup.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::Result;

/// On-disk layout of the settings file
#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    ssid: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    api_key: String,
}

/// Network and credential settings for the device
#[derive(Debug)]
pub struct DeviceSettings {
    /// Wi-Fi network name
    pub ssid: String,

    /// Wi-Fi passphrase
    pub password: SecretString,

    /// Assistant API key
    pub api_key: SecretString,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self::new(String::new(), String::new(), String::new())
    }
}

impl DeviceSettings {
    /// Build settings from plain strings
    #[must_use]
    pub fn new(ssid: String, password: String, api_key: String) -> Self {
        Self {
            ssid,
            password: SecretString::from(password),
            api_key: SecretString::from(api_key),
        }
    }

    /// Whether an API key has been provisioned
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        !self.api_key.expose_secret().trim().is_empty()
    }

    /// Copy of the API key for handing to a client
    #[must_use]
    pub fn api_key(&self) -> SecretString {
        SecretString::from(self.api_key.expose_secret().to_owned())
    }
}

/// TOML-backed store for [`DeviceSettings`]
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Create a store at an explicit path
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location: `~/.config/parley/settings.toml`
    #[must_use]
    pub fn default_path() -> PathBuf {
        directories::BaseDirs::new().map_or_else(
            || PathBuf::from(".parley/settings.toml"),
            |d| d.config_dir().join("parley").join("settings.toml"),
        )
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, returning empty settings if the file doesn't exist
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(&self) -> Result<DeviceSettings> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "no stored settings");
            return Ok(DeviceSettings::default());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let file: SettingsFile = toml::from_str(&content)?;

        tracing::debug!(path = %self.path.display(), ssid = %file.ssid, "loaded settings");
        Ok(DeviceSettings::new(file.ssid, file.password, file.api_key))
    }

    /// Persist settings, creating parent directories as needed
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, settings: &DeviceSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = SettingsFile {
            ssid: settings.ssid.clone(),
            password: settings.password.expose_secret().to_owned(),
            api_key: settings.api_key.expose_secret().to_owned(),
        };
        std::fs::write(&self.path, toml::to_string(&file)?)?;

        tracing::info!(path = %self.path.display(), ssid = %settings.ssid, "settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("settings.toml"));

        store
            .save(&DeviceSettings::new(
                "home".to_string(),
                "hunter2".to_string(),
                "AIza-test".to_string(),
            ))
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.ssid, "home");
        assert_eq!(loaded.password.expose_secret(), "hunter2");
        assert_eq!(loaded.api_key.expose_secret(), "AIza-test");
        assert!(loaded.has_api_key());
    }

    #[test]
    fn missing_file_yields_unconfigured_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.toml"));

        let loaded = store.load().unwrap();
        assert!(loaded.ssid.is_empty());
        assert!(!loaded.has_api_key());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let settings =
            DeviceSettings::new("home".to_string(), "hunter2".to_string(), "key".to_string());
        let debug = format!("{settings:?}");
        assert!(!debug.contains("hunter2"));
    }
}
