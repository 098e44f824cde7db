//! Application configuration.
//!
//! Settings live in a `config.json` under the per-user data directory
//! (%APPDATA%/<product>/ on Windows). Loading never fails hard: a missing or
//! unreadable file yields the defaults so the shell always starts.

use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use crate::branding;
use crate::summon::{DesktopBehavior, MonitorBehavior};

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Escape hatch: skip single-instance coordination entirely, so every
    /// launch becomes an independent instance.
    pub isolated_mode: bool,
    /// Keep the process alive with zero windows instead of exiting.
    pub allow_headless: bool,
    /// Force the notification icon regardless of window state.
    pub always_show_notification_icon: bool,
    /// Minimized windows hide into the notification area, which also
    /// requires the icon.
    pub minimize_to_notification_area: bool,
    /// Overrides window-thread reuse; `None` picks the platform default.
    pub reuse_window_threads: Option<bool>,
    pub global_hotkeys: Vec<HotkeySetting>,
}

impl AppConfig {
    /// Whether settings alone demand the notification icon, before any
    /// quake window is taken into account.
    pub fn requests_tray_icon(&self) -> bool {
        self.always_show_notification_icon || self.minimize_to_notification_area
    }
}

/// One global hotkey entry as written in settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct HotkeySetting {
    /// Key name: a letter, a digit, or F1..F12.
    pub key: String,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub win: bool,
    /// Window to summon; empty/None summons by recency and falls back to a
    /// new window.
    pub window_name: Option<String>,
    pub desktop: DesktopBehavior,
    pub monitor: MonitorBehavior,
    pub toggle_visibility: bool,
    pub dropdown_duration: u32,
}

impl Default for HotkeySetting {
    fn default() -> Self {
        HotkeySetting {
            key: String::new(),
            ctrl: false,
            alt: false,
            shift: false,
            win: false,
            window_name: None,
            desktop: DesktopBehavior::Any,
            monitor: MonitorBehavior::ToCurrent,
            toggle_visibility: true,
            dropdown_duration: 0,
        }
    }
}

/// Get the application's data directory, creating it if needed.
pub fn get_data_directory() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", branding::PRODUCT_DIR)
        .ok_or_else(|| anyhow!("Failed to determine user data directory"))?;

    let data_dir = project_dirs.data_dir();
    fs::create_dir_all(data_dir)
        .map_err(|e| anyhow!("Failed to create data directory: {}", e))?;

    Ok(data_dir.to_path_buf())
}

/// Load configuration from config.json, falling back to defaults.
pub fn load_config() -> AppConfig {
    let Ok(data_dir) = get_data_directory() else {
        return AppConfig::default();
    };

    let config_path = data_dir.join("config.json");
    if !config_path.exists() {
        return AppConfig::default();
    }

    let Ok(contents) = fs::read_to_string(&config_path) else {
        return AppConfig::default();
    };

    serde_json::from_str(&contents).unwrap_or_default()
}

/// Save configuration to config.json.
pub fn save_config(config: &AppConfig) -> Result<()> {
    let data_dir = get_data_directory()?;
    let config_path = data_dir.join("config.json");

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

    fs::write(&config_path, json).map_err(|e| anyhow!("Failed to write config.json: {}", e))?;

    Ok(())
}

/// Modification time of config.json in whole seconds, used by the main loop
/// to detect settings edits.
pub fn config_modified_time() -> Option<u64> {
    let data_dir = get_data_directory().ok()?;
    fs::metadata(data_dir.join("config.json"))
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}
