use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the gradebook client is served from. Only same-origin requests
  /// are handled by the worker.
  pub origin: String,
  /// Base URL of the gradebook API (the health endpoint lives here). API
  /// calls are only cached when this shares the origin, as it does behind
  /// the usual `/api` proxy.
  pub base_url: String,
  pub cache: CacheConfig,
  pub health: HealthConfig,
  pub routes: RoutesConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      base_url: "http://localhost:3000".to_string(),
      cache: CacheConfig::default(),
      health: HealthConfig::default(),
      routes: RoutesConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Bucket name prefix; buckets with this prefix are owned by the app
  pub prefix: String,
  /// Build version used for the static and icon buckets
  pub version: String,
  /// Application shell precached on install
  pub static_assets: Vec<String>,
  /// Icons precached on install and always refreshed from the network
  pub icons: Vec<String>,
  /// Manifest file name, matched as a path suffix
  pub manifest: String,
  /// Path prefixes served network-first
  pub api_prefixes: Vec<String>,
  /// Document served when a navigation fails
  pub offline_page: String,
  /// Image served when an image request fails with nothing cached
  pub fallback_image: String,
  /// Cache database location (defaults to the user data directory)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "gradebook".to_string(),
      version: "v1".to_string(),
      static_assets: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/offline.html".to_string(),
        "/static/js/bundle.js".to_string(),
        "/images/fallback.png".to_string(),
      ],
      icons: vec![
        "/favicon.ico".to_string(),
        "/logo192.png".to_string(),
        "/logo512.png".to_string(),
        "/apple-touch-icon.png".to_string(),
      ],
      manifest: "manifest.json".to_string(),
      api_prefixes: vec!["/api/".to_string()],
      offline_page: "/offline.html".to_string(),
      fallback_image: "/images/fallback.png".to_string(),
      database: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
  /// Health endpoint path, relative to `base_url`
  pub endpoint: String,
  pub poll_interval_ms: u64,
  pub timeout_ms: u64,
  /// Consecutive failed checks before the backend is reported offline
  pub failure_threshold: u32,
  /// Count a timed-out check as a failure instead of ignoring it
  pub timeout_counts_as_failure: bool,
}

impl Default for HealthConfig {
  fn default() -> Self {
    Self {
      endpoint: "/api/health".to_string(),
      poll_interval_ms: 5_000,
      timeout_ms: 3_000,
      failure_threshold: 1,
      timeout_counts_as_failure: false,
    }
  }
}

impl HealthConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
  /// Routes never gated by the health monitor (exact match)
  pub public: Vec<String>,
  /// Route prefixes gated by the health monitor
  pub protected: Vec<String>,
  /// Where the maintenance screen sends the user once the backend recovers
  pub default_route: String,
  pub maintenance_route: String,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      public: vec![
        "/".to_string(),
        "/login".to_string(),
        "/register".to_string(),
        "/forgot-password".to_string(),
        "/maintenance".to_string(),
      ],
      protected: vec![
        "/dashboard".to_string(),
        "/grades".to_string(),
        "/events".to_string(),
        "/ratings".to_string(),
        "/profile".to_string(),
        "/superadmin".to_string(),
      ],
      default_route: "/dashboard".to_string(),
      maintenance_route: "/maintenance".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./gbshell.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/gbshell/config.yaml
  ///
  /// With no file found the built-in defaults are used. `GBSHELL_BASE_URL`
  /// overrides the API base URL either way.
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
      None => {
        info!("No configuration file found, using defaults");
        Config::default()
      }
    };

    if let Ok(base_url) = std::env::var("GBSHELL_BASE_URL") {
      debug!(%base_url, "base URL overridden from environment");
      config.base_url = base_url;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("gbshell.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("gbshell").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    info!(path = %path.display(), "loaded configuration");
    Ok(config)
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    self.base_url()?;
    if self.health.poll_interval_ms == 0 {
      return Err(eyre!("health.poll_interval_ms must be greater than zero"));
    }
    if self.health.failure_threshold == 0 {
      return Err(eyre!("health.failure_threshold must be at least 1"));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.base_url).map_err(|e| eyre!("Invalid base_url '{}': {}", self.base_url, e))
  }

  /// Full URL of the health endpoint.
  pub fn health_url(&self) -> Result<Url> {
    self
      .base_url()?
      .join(&self.health.endpoint)
      .map_err(|e| eyre!("Invalid health endpoint '{}': {}", self.health.endpoint, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.health.poll_interval(), Duration::from_secs(5));
    assert_eq!(config.health.timeout(), Duration::from_secs(3));
    assert_eq!(
      config.health_url().unwrap().as_str(),
      "http://localhost:3000/api/health"
    );
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_default_api_is_same_origin() {
    let config = Config::default();
    assert_eq!(
      config.base_url().unwrap().origin(),
      config.origin_url().unwrap().origin()
    );
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
base_url: https://api.school.test
cache:
  version: v7
health:
  poll_interval_ms: 10000
"#,
    )
    .unwrap();

    assert_eq!(config.base_url, "https://api.school.test");
    assert_eq!(config.cache.version, "v7");
    assert_eq!(config.cache.prefix, "gradebook");
    assert_eq!(config.health.poll_interval(), Duration::from_secs(10));
    assert_eq!(config.health.timeout_ms, 3_000);
    assert_eq!(config.routes.default_route, "/dashboard");
  }

  #[test]
  fn test_invalid_values_rejected() {
    let config = Config::from_yaml("origin: not a url").unwrap();
    assert!(config.validate().is_err());

    let config = Config::from_yaml("health:\n  failure_threshold: 0").unwrap();
    assert!(config.validate().is_err());
  }
}
