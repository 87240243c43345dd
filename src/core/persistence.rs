//! Settings persistence
//!
//! The last transport configuration and refresh rate are stored as JSON in the
//! working directory and restored on the next launch.
//!
//! ## --no-config-cache flag
//!
//! When started with `--no-config-cache`, save and load are skipped so every
//! run begins with defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::protocol::config::{RefreshRate, TransportConfig};

const CONFIG_FILE_NAME: &str = "gpslink_config.json";

static NO_CONFIG_CACHE: AtomicBool = AtomicBool::new(false);

pub fn set_no_cache(enabled: bool) {
    NO_CONFIG_CACHE.store(enabled, Ordering::SeqCst);
    if enabled {
        log::info!("Config cache disabled (--no-config-cache)");
    }
}

fn is_no_cache() -> bool {
    NO_CONFIG_CACHE.load(Ordering::SeqCst)
}

/// What survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSettings {
    #[serde(default)]
    pub config: TransportConfig,
    #[serde(default)]
    pub refresh_rate: RefreshRate,
}

fn get_config_path() -> Result<PathBuf> {
    let config_dir = std::env::current_dir().context("Failed to get current working directory")?;
    Ok(config_dir.join(CONFIG_FILE_NAME))
}

pub fn save_settings(settings: &PersistedSettings) -> Result<()> {
    if is_no_cache() {
        log::debug!("Skipping config save (--no-config-cache enabled)");
        return Ok(());
    }
    save_settings_to(&get_config_path()?, settings)
}

/// Load saved settings, or `None` when nothing was saved yet.
pub fn load_settings() -> Result<Option<PersistedSettings>> {
    if is_no_cache() {
        log::debug!("Skipping config load (--no-config-cache enabled)");
        return Ok(None);
    }
    load_settings_from(&get_config_path()?)
}

pub fn save_settings_to(path: &Path, settings: &PersistedSettings) -> Result<()> {
    let json = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
    fs::write(path, json).with_context(|| format!("Failed to write config to {path:?}"))?;
    log::debug!("Saved settings to {path:?}");
    Ok(())
}

pub fn load_settings_from(path: &Path) -> Result<Option<PersistedSettings>> {
    if !path.exists() {
        log::debug!("No saved config found at {path:?}");
        return Ok(None);
    }

    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {path:?}"))?;
    let settings: PersistedSettings =
        serde_json::from_str(&json).context("Failed to deserialize settings")?;

    if let Err(err) = settings.config.validate() {
        log::warn!("Ignoring saved config at {path:?}: {err}");
        return Ok(None);
    }

    log::info!("Loaded settings from {path:?}: {}", settings.config);
    Ok(Some(settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::config::SerialConfig;

    fn scratch_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gpslink_{name}_{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_save_then_load() -> Result<()> {
        let path = scratch_file("roundtrip");
        let settings = PersistedSettings {
            config: TransportConfig::Serial(SerialConfig {
                port: "COM4".to_string(),
                baud_rate: 9600,
            }),
            refresh_rate: RefreshRate::Slow,
        };

        save_settings_to(&path, &settings)?;
        let loaded = load_settings_from(&path)?;
        fs::remove_file(&path)?;

        assert_eq!(loaded, Some(settings));
        Ok(())
    }

    #[test]
    fn test_missing_file_loads_nothing() -> Result<()> {
        assert_eq!(load_settings_from(&scratch_file("missing"))?, None);
        Ok(())
    }

    #[test]
    fn test_invalid_saved_config_is_ignored() -> Result<()> {
        let path = scratch_file("invalid");
        fs::write(&path, r#"{"config":{"type":"udp","port":0,"netmask":"255.255.255.255"}}"#)?;
        let loaded = load_settings_from(&path)?;
        fs::remove_file(&path)?;

        assert_eq!(loaded, None);
        Ok(())
    }

    #[test]
    fn test_garbage_is_an_error() -> Result<()> {
        let path = scratch_file("garbage");
        fs::write(&path, "not json")?;
        let result = load_settings_from(&path);
        fs::remove_file(&path)?;

        assert!(result.is_err());
        Ok(())
    }
}
