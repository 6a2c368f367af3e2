use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::classify::ClassifierRules;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL that relative manifest entries and notification targets resolve against
  pub origin: String,
  pub cache: CacheConfig,
  /// Assets fetched into the new generation at install time
  pub manifest: Vec<String>,
  pub classifier: ClassifierRules,
  pub sync: SyncConfig,
  pub notification: NotificationConfig,
  pub network: NetworkConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      cache: CacheConfig::default(),
      manifest: vec!["/".to_string(), "/index.html".to_string()],
      classifier: ClassifierRules::default(),
      sync: SyncConfig::default(),
      notification: NotificationConfig::default(),
      network: NetworkConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix shared by every generation of this agent's store
  pub name: String,
  /// Bumped on upgrade; a new version installs a new generation
  pub version: String,
  /// Request headers that take part in the cache key
  #[serde(deserialize_with = "deserialize_lowercase_list")]
  pub vary_headers: Vec<String>,
  /// Database file (default: $XDG_DATA_HOME/waystation/agent.db)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: "waystation".to_string(),
      version: "v1".to_string(),
      vary_headers: Vec::new(),
      database: None,
    }
  }
}

fn deserialize_lowercase_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Tag a replay signal must carry to drain the queue
  pub tag: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "analytics-sync".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push signal carries no text
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds (on, off, on, ...)
  pub vibrate: Vec<u32>,
  /// Page opened when the notification is clicked
  pub open_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Waystation".to_string(),
      default_body: "New content is available.".to_string(),
      icon: "/icons/icon-192.png".to_string(),
      badge: "/icons/badge-72.png".to_string(),
      vibrate: vec![100, 50, 100],
      open_url: "/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub user_agent: String,
  /// Per-request timeout; unset means the agent never times a fetch out
  pub timeout_secs: Option<u64>,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      user_agent: format!("waystation/{}", env!("CARGO_PKG_VERSION")),
      timeout_secs: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./waystation.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/waystation/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found. `WAYSTATION_ORIGIN`
  /// overrides the origin in every case.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Some(origin) = Self::origin_override() {
      config.origin = origin;
    }

    config.origin_url()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("waystation.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("waystation").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn origin_override() -> Option<String> {
    std::env::var("WAYSTATION_ORIGIN")
      .ok()
      .filter(|s| !s.is_empty())
  }

  /// Parsed origin.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Name of the generation this configuration installs, e.g. `waystation-v2`.
  pub fn generation_name(&self) -> String {
    format!("{}-{}", self.cache.name, self.cache.version)
  }
}
