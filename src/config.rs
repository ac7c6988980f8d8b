use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::providers::azure_devops::{DEFAULT_BASE_URL, REQUEST_TIMEOUT};
use crate::validation::DEFAULT_BATCH_SIZE;

const ENV_API_BASE_URL: &str = "PBI_LINK_API_BASE_URL";
const ENV_DATA_DIR: &str = "PBI_LINK_DATA_DIR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Remote API root; may point at a forwarding proxy.
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub batch_size: usize,
    pub data_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT.as_secs(),
            batch_size: DEFAULT_BATCH_SIZE,
            data_dir: None,
        }
    }
}

impl AppSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    fn apply_env(mut self) -> Self {
        if let Some(url) = env_value(ENV_API_BASE_URL) {
            self.api_base_url = url;
        }
        if let Some(dir) = env_value(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        self
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pbi-link")
}

fn config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

pub fn load_settings() -> Result<AppSettings> {
    Ok(load_settings_from(&config_path())?.apply_env())
}

pub fn load_settings_from(path: &Path) -> Result<AppSettings> {
    if !path.exists() {
        return Ok(AppSettings::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let settings: AppSettings = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(settings)
}
