// Engine configuration for chatsync
// JSON file in the user config directory, overridable from the environment

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::chat::connection::ReconnectPolicy;
use crate::chat::store::DEFAULT_ECHO_TOLERANCE_MS;

pub const ENV_SOCKET_URL: &str = "CHATSYNC_SOCKET_URL";
pub const ENV_API_URL: &str = "CHATSYNC_API_URL";
pub const ENV_IMAGE_URL: &str = "CHATSYNC_IMAGE_URL";
pub const ENV_ACCESS_TOKEN: &str = "CHATSYNC_ACCESS_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Websocket endpoint of the messaging service
    pub socket_url: String,
    /// Base URL of the REST API (history, contacts)
    pub api_base_url: String,
    /// Prefix for relative avatar paths
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub request_timeout_secs: u64,
    /// How far apart an optimistic send and its server echo may be stamped
    pub echo_tolerance_ms: i64,
    /// Automatic reconnect; absent means a dropped link stays down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<ReconnectPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            socket_url: "ws://localhost:3000/ws".to_string(),
            api_base_url: "http://localhost:3000/api".to_string(),
            image_base_url: None,
            access_token: None,
            request_timeout_secs: 10,
            echo_tolerance_ms: DEFAULT_ECHO_TOLERANCE_MS,
            reconnect: None,
        }
    }
}

impl EngineConfig {
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = lookup(ENV_SOCKET_URL) {
            debug!("{} overrides socket url", ENV_SOCKET_URL);
            self.socket_url = url;
        }
        if let Some(url) = lookup(ENV_API_URL) {
            debug!("{} overrides api url", ENV_API_URL);
            self.api_base_url = url;
        }
        if let Some(url) = lookup(ENV_IMAGE_URL) {
            self.image_base_url = Some(url);
        }
        if let Some(token) = lookup(ENV_ACCESS_TOKEN) {
            self.access_token = Some(token);
        }
    }
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Use `path` instead of the default config file for the rest of the process.
/// Returns false if an override was already set.
pub fn set_config_path_override(path: PathBuf) -> bool {
    CONFIG_PATH_OVERRIDE.set(path).is_ok()
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("chatsync");
    Ok(config_dir)
}

pub fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("config.json"))
}

/// Resolve the configuration: explicit path, then the override, then the
/// default location. A missing file means defaults. Environment wins last.
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        debug!("No config at {}, using defaults", path.display());
        EngineConfig::default()
    };
    config.apply_env();
    Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<EngineConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: EngineConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, config)?;
    info!("Config saved to {}", path.display());
    Ok(())
}
