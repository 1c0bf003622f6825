use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::sync::{default_groups, CacheGroup, FreshnessPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the field-operations API.
  pub base_url: String,
  /// Per-request timeout; bounds how long one flaky endpoint can stall a
  /// battery.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Minimum interval between refresh batteries.
  #[serde(default = "default_ttl_minutes")]
  pub ttl_minutes: i64,
  /// When a battery may advance the freshness marker.
  #[serde(default)]
  pub freshness: FreshnessPolicy,
  /// Override of the default cache-group table. Keys are the persistence
  /// keys consumers read; changing a well-known key breaks them.
  #[serde(default)]
  pub groups: Option<Vec<CacheGroup>>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_minutes: default_ttl_minutes(),
      freshness: FreshnessPolicy::default(),
      groups: None,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::minutes(self.ttl_minutes)
  }

  pub fn groups(&self) -> Vec<CacheGroup> {
    self.groups.clone().unwrap_or_else(default_groups)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  /// Retry threshold after which a stuck queued mutation is surfaced
  /// instead of retried silently.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_ttl_minutes() -> i64 {
  10
}

fn default_max_attempts() -> u32 {
  5
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/fieldsync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("fieldsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the API bearer token from the environment.
  pub fn get_api_token() -> Result<String> {
    std::env::var("FIELDSYNC_API_TOKEN")
      .map_err(|_| eyre!("API token not found. Set the FIELDSYNC_API_TOKEN environment variable."))
  }
}
