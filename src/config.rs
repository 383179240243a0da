use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{NamespaceFamily, Strategy};
use crate::router::ResourceClass;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the backend, e.g. `https://app.example.com`
  pub origin: String,
  /// Build tag stamped on every namespace this process creates
  #[serde(default = "default_version")]
  pub version: String,
  /// Name shown as the title of plain-text notifications
  #[serde(default = "default_app_name")]
  pub app_name: String,
  /// Path prefix of the REST surface
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// Upper bound on any single network attempt
  #[serde(default = "default_network_timeout_ms")]
  pub network_timeout_ms: u64,
  #[serde(default)]
  pub storage: StorageConfig,
  /// Capacity overrides keyed by family name (`api`, `static`, ...)
  #[serde(default)]
  pub namespaces: HashMap<String, NamespaceConfig>,
  /// Extra routing rules checked before the built-in ones
  #[serde(default)]
  pub routes: Vec<RouteConfig>,
  #[serde(default)]
  pub install: InstallConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub eviction: EvictionConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/outpost/outpost.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct NamespaceConfig {
  pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
  pub class: ResourceClass,
  /// Regex matched against the URL path
  pub pattern: String,
  pub strategy: Strategy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallConfig {
  /// Shell documents and assets seeded into the shell namespace
  #[serde(default = "default_shell_assets")]
  pub shell_assets: Vec<String>,
  /// API endpoints pre-warmed into the api namespace
  #[serde(default = "default_prewarm")]
  pub prewarm: Vec<String>,
  /// Cached document served for navigations while offline
  #[serde(default = "default_shell_fallback")]
  pub shell_fallback: String,
}

impl Default for InstallConfig {
  fn default() -> Self {
    Self {
      shell_assets: default_shell_assets(),
      prewarm: default_prewarm(),
      shell_fallback: default_shell_fallback(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Periodic drain interval
  #[serde(default = "default_sync_interval_secs")]
  pub interval_secs: u64,
  /// Failed attempts tolerated before an action is given up on
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  #[serde(default = "default_backoff_base_ms")]
  pub backoff_base_ms: u64,
  #[serde(default = "default_backoff_max_ms")]
  pub backoff_max_ms: u64,
  /// Polled after a pass that delivered something; empty disables polling
  #[serde(default = "default_check_updates_path")]
  pub check_updates_path: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_sync_interval_secs(),
      max_retries: default_max_retries(),
      backoff_base_ms: default_backoff_base_ms(),
      backoff_max_ms: default_backoff_max_ms(),
      check_updates_path: default_check_updates_path(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvictionConfig {
  #[serde(default = "default_eviction_interval_secs")]
  pub interval_secs: u64,
}

impl Default for EvictionConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_eviction_interval_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive used when OUTPOST_LOG is unset
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Mirror log lines to stderr as well as the log file
  #[serde(default)]
  pub stderr: bool,
  /// Directory for rolling log files (default: next to the database)
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      stderr: false,
      dir: None,
    }
  }
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_app_name() -> String {
  "Outpost".to_string()
}

fn default_api_prefix() -> String {
  "/api".to_string()
}

fn default_network_timeout_ms() -> u64 {
  5_000
}

fn default_shell_assets() -> Vec<String> {
  vec![
    "/".to_string(),
    "/index.html".to_string(),
    "/offline.html".to_string(),
    "/manifest.json".to_string(),
  ]
}

fn default_prewarm() -> Vec<String> {
  vec![
    "/api/projects".to_string(),
    "/api/dashboard/stats".to_string(),
  ]
}

fn default_shell_fallback() -> String {
  "/".to_string()
}

fn default_sync_interval_secs() -> u64 {
  300
}

fn default_max_retries() -> u32 {
  5
}

fn default_backoff_base_ms() -> u64 {
  1_000
}

fn default_backoff_max_ms() -> u64 {
  300_000
}

fn default_check_updates_path() -> String {
  "/api/sync/check-updates".to_string()
}

fn default_eviction_interval_secs() -> u64 {
  24 * 60 * 60
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Minimal configuration for an origin, everything else defaulted.
  pub fn for_origin(origin: &str) -> Self {
    Self {
      origin: origin.trim_end_matches('/').to_string(),
      version: default_version(),
      app_name: default_app_name(),
      api_prefix: default_api_prefix(),
      network_timeout_ms: default_network_timeout_ms(),
      storage: StorageConfig::default(),
      namespaces: HashMap::new(),
      routes: Vec::new(),
      install: InstallConfig::default(),
      sync: SyncConfig::default(),
      eviction: EvictionConfig::default(),
      log: LogConfig::default(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./outpost.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/outpost/config.yaml
  ///
  /// OUTPOST_ORIGIN overrides the origin from the file.
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
      None => match Self::origin_override() {
        Some(origin) => Self::for_origin(&origin),
        None => {
          return Err(eyre!(
            "No configuration file found. Create one at ~/.config/outpost/config.yaml\n\
                 or set OUTPOST_ORIGIN."
          ))
        }
      },
    };

    if let Some(origin) = Self::origin_override() {
      config.origin = origin.trim_end_matches('/').to_string();
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("outpost.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("outpost").join("config.yaml");
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
    let mut config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.origin = config.origin.trim_end_matches('/').to_string();
    Ok(config)
  }

  /// Get the origin override from the environment.
  ///
  /// Checks OUTPOST_ORIGIN.
  pub fn origin_override() -> Option<String> {
    std::env::var("OUTPOST_ORIGIN").ok().filter(|s| !s.is_empty())
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    if self.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    for route in &self.routes {
      regex::Regex::new(&route.pattern)
        .map_err(|e| eyre!("Invalid route pattern '{}': {}", route.pattern, e))?;
    }
    Ok(())
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_millis(self.network_timeout_ms)
  }

  /// Capacity of a namespace family, with per-family defaults.
  pub fn capacity(&self, family: NamespaceFamily) -> usize {
    if let Some(ns) = self.namespaces.get(family.as_str()) {
      return ns.capacity;
    }
    match family {
      NamespaceFamily::Api => 100,
      NamespaceFamily::Static => 200,
      NamespaceFamily::Images => 60,
      NamespaceFamily::Fonts => 30,
      NamespaceFamily::Shell => 50,
    }
  }

  /// Absolute URL for a path on the configured origin.
  pub fn url_for(&self, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
      path.to_string()
    } else {
      format!("{}/{}", self.origin, path.trim_start_matches('/'))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_yaml_gets_defaults() {
    let config = Config::from_yaml("origin: https://app.test/\n").unwrap();
    assert_eq!(config.origin, "https://app.test");
    assert_eq!(config.version, "v1");
    assert_eq!(config.sync.max_retries, 5);
    assert_eq!(config.install.shell_fallback, "/");
    assert_eq!(config.capacity(NamespaceFamily::Api), 100);
    assert_eq!(config.network_timeout(), Duration::from_secs(5));
  }

  #[test]
  fn test_full_yaml() {
    let yaml = r#"
origin: https://field.example.com
version: "2024.06.1"
network_timeout_ms: 1500
namespaces:
  api:
    capacity: 25
routes:
  - class: api
    pattern: "^/api/reports/"
    strategy: cache-only
install:
  shell_assets: ["/", "/app.css"]
  prewarm: []
sync:
  max_retries: 2
  check_updates_path: ""
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.version, "2024.06.1");
    assert_eq!(config.capacity(NamespaceFamily::Api), 25);
    assert_eq!(config.capacity(NamespaceFamily::Fonts), 30);
    assert_eq!(config.routes[0].strategy, Strategy::CacheOnly);
    assert_eq!(config.routes[0].class, ResourceClass::Api);
    assert_eq!(config.install.shell_assets.len(), 2);
    assert!(config.install.prewarm.is_empty());
    assert_eq!(config.sync.max_retries, 2);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_invalid_route_pattern_rejected() {
    let mut config = Config::for_origin("https://app.test");
    config.routes.push(RouteConfig {
      class: ResourceClass::Static,
      pattern: "([".to_string(),
      strategy: Strategy::CacheFirst,
    });
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outpost.yaml");
    std::fs::write(&path, "origin: https://app.test\nversion: v9\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.version, "v9");
  }

  #[test]
  fn test_url_for() {
    let config = Config::for_origin("https://app.test/");
    assert_eq!(config.url_for("/api/projects"), "https://app.test/api/projects");
    assert_eq!(config.url_for("index.html"), "https://app.test/index.html");
    assert_eq!(config.url_for("https://cdn.test/x.js"), "https://cdn.test/x.js");
  }
}
