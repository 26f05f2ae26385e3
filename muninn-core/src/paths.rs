use std::path::{Path, PathBuf};

/// `MUNINN_HOME`, else `~/.muninn`.
pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Ok(home) = std::env::var("MUNINN_HOME") {
    if !home.trim().is_empty() {
      return Ok(PathBuf::from(home));
    }
  }
  let home = std::env::var("HOME")
    .or_else(|_| std::env::var("USERPROFILE"))
    .map_err(|_| anyhow::anyhow!("neither MUNINN_HOME nor HOME is set"))?;
  Ok(PathBuf::from(home).join(".muninn"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

/// Synced storage area (settings).
pub fn sync_store_path(base: &Path) -> PathBuf {
  base.join("storage").join("sync.json")
}

/// Per-device storage area (cached scan results).
pub fn local_store_path(base: &Path) -> PathBuf {
  base.join("storage").join("local.json")
}
