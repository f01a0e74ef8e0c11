//! reviewgraph configuration file handling
//!
//! Loads and manages the ~/.config/reviewgraph/config.yaml file.

use crate::github::RetryConfig;
use crate::ingest::SyncConfig;
use crate::store::StoreConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// GitHub host settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSettings {
    /// github.com or a GitHub Enterprise base URL
    #[serde(default = "default_github_url")]
    pub url: String,

    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_github_url() -> String {
    "https://github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            url: default_github_url(),
            token_env: default_token_env(),
        }
    }
}

/// Sync tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Minimum seconds between two sync passes of one repository
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Page size for listings (GitHub caps this at 100)
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Concurrent pull requests whose reviews/files are fetched at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Retries for transient API failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_cooldown_secs() -> u64 {
    20
}

fn default_per_page() -> u32 {
    100
}

fn default_workers() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            per_page: default_per_page(),
            workers: default_workers(),
            max_retries: default_max_retries(),
        }
    }
}

impl SyncSettings {
    /// Engine configuration for these settings
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            cooldown: Duration::from_secs(self.cooldown_secs),
            per_page: self.per_page.clamp(1, 100),
            workers: self.workers.max(1),
            retry: RetryConfig {
                max_retries: self.max_retries,
                ..RetryConfig::default()
            },
        }
    }
}

/// Query Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Listen address
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Run a sync pass before answering each graph request
    #[serde(default = "default_sync_on_request")]
    pub sync_on_request: bool,
}

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_sync_on_request() -> bool {
    true
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            sync_on_request: default_sync_on_request(),
        }
    }
}

/// reviewgraph configuration
///
/// Represents the complete ~/.config/reviewgraph/config.yaml file. Every section
/// is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewGraphConfig {
    #[serde(default)]
    pub github: GitHubSettings,

    /// Durable cache location and backend
    #[serde(default)]
    pub cache: StoreConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

impl ReviewGraphConfig {
    /// Load configuration from the default path, or defaults if it does not exist
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::ReviewGraphError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading reviewgraph configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        tracing::debug!(
            github = %config.github.url,
            cache = %config.cache.path.display(),
            addr = %config.server.addr,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving reviewgraph configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/reviewgraph/config.yaml)
    pub fn default_path() -> PathBuf {
        // Always use ~/.config for consistency across platforms (macOS, Linux)
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("reviewgraph");
        path.push("config.yaml");
        path
    }
}
