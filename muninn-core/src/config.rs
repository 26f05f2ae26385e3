use crate::remote::RetryPolicy;
use crate::storage::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Process configuration for the host. User toggles live in
/// [`crate::settings::Settings`] instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
  pub logging: LoggingConfig,
  pub remote: RemoteConfig,
  pub retry: RetryPolicy,
  pub scan: ScanConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
  #[serde(default = "default_timeout_seconds")]
  pub timeout_seconds: u64,

  #[serde(default = "default_max_response_bytes")]
  pub max_response_bytes: usize,
}

fn default_timeout_seconds() -> u64 {
  30
}

fn default_max_response_bytes() -> usize {
  2 * 1024 * 1024
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      timeout_seconds: default_timeout_seconds(),
      max_response_bytes: default_max_response_bytes(),
    }
  }
}

/// What a second scan request for a page already being scanned gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InFlightPolicy {
  /// Wait for the running request and share its result.
  #[default]
  Coalesce,
  /// Fail fast with `ScanInProgress`.
  Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
  #[serde(default)]
  pub in_flight: InFlightPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub remote: Option<RemoteConfig>,

  #[serde(default)]
  pub retry: Option<RetryPolicy>,

  #[serde(default)]
  pub scan: Option<ScanConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(r) = self.remote {
      cfg.remote = r;
    }
    if let Some(r) = self.retry {
      cfg.retry = r;
    }
    if let Some(s) = self.scan {
      cfg.scan = s;
    }

    if let Some(reason) = cfg.retry.validate() {
      tracing::warn!(reason = %reason, "retry config invalid; using defaults");
      cfg.retry = RetryPolicy::default();
    }
    if cfg.remote.timeout_seconds == 0 {
      tracing::warn!("remote.timeout_seconds must be > 0; using default");
      cfg.remote.timeout_seconds = default_timeout_seconds();
    }
    if cfg.remote.max_response_bytes == 0 {
      tracing::warn!("remote.max_response_bytes must be > 0; using default");
      cfg.remote.max_response_bytes = default_max_response_bytes();
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.logging.is_none() || self.remote.is_none() || self.retry.is_none() || self.scan.is_none()
  }
}

/// Loads `path`, writing defaults when it is missing, filling in missing
/// sections (with a backup), and replacing an unparsable file with defaults
/// (keeping the bad file as `config.toml.bad-<ts>`).
pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent)?;

  if !path.exists() {
    let cfg = Config::default();
    write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let upgrade = file.needs_upgrade();
      let cfg = file.normalize();
      if upgrade {
        let backup = parent.join(format!("config.toml.bak-{}", unix_seconds()));
        let _ = fs::copy(path, &backup);
        let _ = write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?);
        eprintln!(
          "Muninn: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      let backup = parent.join(format!("config.toml.bad-{}", unix_seconds()));
      let _ = fs::rename(path, &backup);
      write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
      eprintln!(
        "Muninn: invalid config at {} (backed up to {}): {e}",
        path.display(),
        backup.display()
      );
      Ok(cfg)
    }
  }
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    logging: Some(cfg.logging.clone()),
    remote: Some(cfg.remote.clone()),
    retry: Some(cfg.retry.clone()),
    scan: Some(cfg.scan.clone()),
  }
}

fn unix_seconds() -> u64 {
  crate::types::now_unix_ms() / 1000
}
