use crate::error::StorageError;
use anyhow::Context;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Host key-value storage area (the extension's `storage.sync` / `storage.local`).
///
/// Individual calls are atomic; read-modify-write sequences built on top of
/// them are not.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
  fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
  fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, Value>>,
  writes: AtomicUsize,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of `set` calls served so far.
  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
    self.entries.lock().unwrap_or_else(|p| p.into_inner())
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
    Ok(self.entries().get(key).cloned())
  }

  fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.entries().insert(key.to_string(), value);
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    self.entries().remove(key);
    Ok(())
  }
}

/// One JSON object per storage area, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileStore {
  path: PathBuf,
  lock: Mutex<()>,
}

impl FileStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn read_all(&self) -> anyhow::Result<Map<String, Value>> {
    if !self.path.exists() {
      return Ok(Map::new());
    }
    let raw = fs::read_to_string(&self.path)
      .with_context(|| format!("read {}", self.path.display()))?;
    if raw.trim().is_empty() {
      return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&raw)
      .with_context(|| format!("parse {}", self.path.display()))?
    {
      Value::Object(map) => Ok(map),
      _ => anyhow::bail!("{} is not a JSON object", self.path.display()),
    }
  }

  fn write_all(&self, map: &Map<String, Value>) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(map)?;
    write_atomic(&self.path, &raw)
  }

  fn update(
    &self,
    op: &'static str,
    key: &str,
    f: impl FnOnce(&mut Map<String, Value>),
  ) -> Result<(), StorageError> {
    let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
    let mut map = self
      .read_all()
      .map_err(|e| StorageError::new(op, key, format!("{e:#}")))?;
    f(&mut map);
    self
      .write_all(&map)
      .map_err(|e| StorageError::new(op, key, format!("{e:#}")))
  }
}

impl KeyValueStore for FileStore {
  fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
    let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
    let map = self
      .read_all()
      .map_err(|e| StorageError::new("get", key, format!("{e:#}")))?;
    Ok(map.get(key).cloned())
  }

  fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
    self.update("set", key, |map| {
      map.insert(key.to_string(), value);
    })
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    self.update("remove", key, |map| {
      map.remove(key);
    })
  }
}

/// Temp file in the same directory, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent)?;

  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));
  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}
