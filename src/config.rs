use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Cache generation baked into this build of the agent.
pub const CACHE_NAME: &str = "mixing-calc-v1.2.2";

/// Assets fetched and stored at install time, relative to the scope.
pub const PRECACHE_URLS: &[&str] = &["./", "./index.html"];

const DEFAULT_SCOPE: &str = "http://localhost:8080/";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Generation identifier for the cache store owned by this agent
  #[serde(default = "default_cache_name")]
  pub cache_name: String,
  /// Base URL the agent controls; manifest entries resolve against it
  #[serde(default = "default_scope")]
  pub scope: Url,
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub network: NetworkConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database path (defaults to $XDG_DATA_HOME/offline-agent/caches.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl NetworkConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

fn default_cache_name() -> String {
  CACHE_NAME.to_string()
}

fn default_scope() -> Url {
  Url::parse(DEFAULT_SCOPE).expect("DEFAULT_SCOPE is a valid URL")
}

fn default_precache() -> Vec<String> {
  PRECACHE_URLS.iter().map(|s| s.to_string()).collect()
}

fn default_timeout_secs() -> u64 {
  30
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_name: default_cache_name(),
      scope: default_scope(),
      precache: default_precache(),
      storage: StorageConfig::default(),
      network: NetworkConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-agent.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-agent/config.yaml
  ///
  /// Falls back to the built-in generation and manifest when no file exists.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-agent.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-agent").join("config.yaml");
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

    if config.cache_name.trim().is_empty() {
      return Err(eyre!("cache_name must not be empty in {}", path.display()));
    }

    Ok(config)
  }

  /// Resolved database path.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(p) => Ok(p.clone()),
      None => Ok(data_dir()?.join("caches.db")),
    }
  }
}

/// Per-user data directory for the agent (database, logs).
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("offline-agent"))
}
