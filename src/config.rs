use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{StoreClass, Strategy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Prefix of every store name owned by this application
  #[serde(default = "default_namespace")]
  pub namespace: String,
  /// Release tag embedded in store names; bump it to orphan old stores
  #[serde(default = "default_version")]
  pub version: String,
  /// Base URL for relative paths (precache list, CLI arguments)
  pub origin: Option<String>,
  /// Static assets cached on install
  #[serde(default)]
  pub precache: Vec<String>,
  /// Policy rules in match order. The built-in table is used when absent.
  pub policies: Option<Vec<PolicyConfig>>,
  /// Catch-all rule applied when no policy matches
  pub default_policy: Option<PolicyConfig>,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      namespace: default_namespace(),
      version: default_version(),
      origin: None,
      precache: Vec::new(),
      policies: None,
      default_policy: None,
      network: NetworkConfig::default(),
      storage: StorageConfig::default(),
      log: LogConfig::default(),
    }
  }
}

fn default_namespace() -> String {
  "casa".to_string()
}

fn default_version() -> String {
  "v1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
  /// Written as a single-key map, e.g. `{regex: '\.png$'}`
  #[serde(with = "serde_yaml::with::singleton_map")]
  pub pattern: PatternConfig,
  #[serde(default)]
  pub strategy: Strategy,
  pub store: StoreClass,
  pub max_age_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternConfig {
  /// Substring of the full URL
  Contains(String),
  /// Regular expression over the full URL
  Regex(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
      user_agent: default_user_agent(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_user_agent() -> String {
  format!("casa-cache/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database path (default: $XDG_DATA_HOME/casa-cache/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive used when CASA_CACHE_LOG is unset
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Directory for log files (default: $XDG_DATA_HOME/casa-cache/logs)
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      directory: None,
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./casa-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/casa-cache/config.yaml
  ///
  /// Built-in defaults apply when no file is found.
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
    // Check current directory
    let local = PathBuf::from("casa-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("casa-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    if config.namespace.is_empty() || config.namespace.contains('-') {
      return Err(eyre!(
        "namespace must be non-empty and must not contain '-': {:?}",
        config.namespace
      ));
    }

    Ok(config)
  }
}
