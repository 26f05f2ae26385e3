use crate::storage::KeyValueStore;
use crate::types::{now_unix_ms, PageId, ScanResult, TabId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
  Page(PageId),
  Tab(TabId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub result: Arc<ScanResult>,
  pub scanned_at_unix_ms: u64,
}

impl CacheEntry {
  pub fn new(result: Arc<ScanResult>) -> Self {
    Self {
      result,
      scanned_at_unix_ms: now_unix_ms(),
    }
  }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
  result: ScanResult,
  scanned_at_unix_ms: u64,
}

/// Latest scan result per page URL and per tab.
///
/// Writes are last-write-wins in completion order: a slow response that
/// lands after a newer one replaces it. There is no TTL.
pub struct ScanCache {
  entries: Mutex<HashMap<CacheKey, CacheEntry>>,
  local: Option<Arc<dyn KeyValueStore>>,
}

impl ScanCache {
  pub fn in_memory() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      local: None,
    }
  }

  /// Page entries are written through to `local` and read back from it on a
  /// memory miss.
  pub fn with_local_store(local: Arc<dyn KeyValueStore>) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      local: Some(local),
    }
  }

  pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    if let Some(hit) = self.entries().get(key) {
      return Some(hit.clone());
    }

    let CacheKey::Page(page) = key else {
      return None;
    };
    let loaded = self.load_persisted(page)?;
    // A put may have landed while the store was read; it is newer.
    let mut entries = self.entries();
    Some(entries.entry(key.clone()).or_insert(loaded).clone())
  }

  /// Memory and the local store are updated under one lock, so racing puts
  /// leave both holding the same entry.
  pub fn put(&self, key: CacheKey, entry: CacheEntry) {
    let mut entries = self.entries();
    if let CacheKey::Page(page) = &key {
      self.persist(page, &entry);
    }
    entries.insert(key, entry);
  }

  pub fn evict(&self, key: &CacheKey) -> Option<CacheEntry> {
    let mut entries = self.entries();
    let removed = entries.remove(key);
    if let (CacheKey::Page(page), Some(local)) = (key, &self.local) {
      if let Err(e) = local.remove(page.as_str()) {
        tracing::warn!(page = %page.log_label(), error = %e, "failed to evict persisted scan result");
      }
    }
    removed
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
    self.entries.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn persist(&self, page: &PageId, entry: &CacheEntry) {
    let Some(local) = &self.local else {
      return;
    };
    let stored = StoredEntry {
      result: entry.result.as_ref().clone(),
      scanned_at_unix_ms: entry.scanned_at_unix_ms,
    };
    let value = match serde_json::to_value(&stored) {
      Ok(v) => v,
      Err(e) => {
        tracing::warn!(page = %page.log_label(), error = %e, "failed to encode scan result");
        return;
      }
    };
    if let Err(e) = local.set(page.as_str(), value) {
      tracing::warn!(page = %page.log_label(), error = %e, "failed to persist scan result (continuing)");
    }
  }

  fn load_persisted(&self, page: &PageId) -> Option<CacheEntry> {
    let local = self.local.as_ref()?;
    let raw = match local.get(page.as_str()) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        tracing::warn!(page = %page.log_label(), error = %e, "failed to read persisted scan result");
        return None;
      }
    };
    match serde_json::from_value::<StoredEntry>(raw) {
      Ok(stored) => Some(CacheEntry {
        result: Arc::new(stored.result),
        scanned_at_unix_ms: stored.scanned_at_unix_ms,
      }),
      Err(e) => {
        tracing::warn!(page = %page.log_label(), error = %e, "ignoring unreadable persisted scan result");
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStore;
  use std::sync::mpsc;

  fn result(score: f64) -> Arc<ScanResult> {
    Arc::new(ScanResult {
      risk_score: score,
      ..ScanResult::default()
    })
  }

  fn page(url: &str) -> CacheKey {
    CacheKey::Page(PageId::parse(url).unwrap())
  }

  #[test]
  fn put_then_get_round_trips() {
    let cache = ScanCache::in_memory();
    let entry = CacheEntry::new(result(42.0));
    cache.put(page("http://example.com"), entry.clone());
    assert_eq!(cache.get(&page("http://example.com")), Some(entry));
  }

  #[test]
  fn second_put_overwrites() {
    let cache = ScanCache::in_memory();
    cache.put(page("http://example.com"), CacheEntry::new(result(10.0)));
    cache.put(page("http://example.com"), CacheEntry::new(result(90.0)));

    let hit = cache.get(&page("http://example.com")).unwrap();
    assert_eq!(hit.result.risk_score, 90.0);
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn tab_entries_evict_independently() {
    let cache = ScanCache::in_memory();
    cache.put(CacheKey::Tab(7), CacheEntry::new(result(50.0)));
    cache.put(page("http://example.com"), CacheEntry::new(result(50.0)));

    assert!(cache.evict(&CacheKey::Tab(7)).is_some());
    assert!(cache.get(&CacheKey::Tab(7)).is_none());
    assert!(cache.get(&page("http://example.com")).is_some());
  }

  /// Local store whose first `get` reads its value, then blocks until
  /// released.
  struct SlowReadStore {
    inner: MemoryStore,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
  }

  impl KeyValueStore for SlowReadStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, crate::error::StorageError> {
      let value = self.inner.get(key)?;
      if let Some(entered) = self.entered.lock().unwrap().take() {
        entered.send(()).unwrap();
        let release = self.release.lock().unwrap().take().unwrap();
        release.recv().unwrap();
      }
      Ok(value)
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), crate::error::StorageError> {
      self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), crate::error::StorageError> {
      self.inner.remove(key)
    }
  }

  #[test]
  fn put_during_store_read_is_not_overwritten() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let local = Arc::new(SlowReadStore {
      inner: MemoryStore::new(),
      entered: Mutex::new(Some(entered_tx)),
      release: Mutex::new(Some(release_rx)),
    });

    // An earlier session left score 10 on disk.
    let seed = ScanCache::with_local_store(local.clone());
    seed.persist(
      &PageId::parse("http://example.com").unwrap(),
      &CacheEntry::new(result(10.0)),
    );

    let cache = Arc::new(ScanCache::with_local_store(local.clone()));
    let reader = {
      let cache = cache.clone();
      std::thread::spawn(move || cache.get(&page("http://example.com")))
    };
    entered_rx.recv().unwrap();

    cache.put(page("http://example.com"), CacheEntry::new(result(90.0)));
    release_tx.send(()).unwrap();

    let seen = reader.join().unwrap().unwrap();
    assert_eq!(seen.result.risk_score, 90.0);
    let hit = cache.get(&page("http://example.com")).unwrap();
    assert_eq!(hit.result.risk_score, 90.0);

    let on_disk: StoredEntry =
      serde_json::from_value(local.inner.get("http://example.com/").unwrap().unwrap()).unwrap();
    assert_eq!(on_disk.result.risk_score, 90.0);
  }

  #[test]
  fn page_entries_reload_from_local_store() {
    let local = Arc::new(MemoryStore::new());
    let first = ScanCache::with_local_store(local.clone());
    first.put(page("https://example.com/a#frag"), CacheEntry::new(result(75.0)));

    let second = ScanCache::with_local_store(local);
    let hit = second.get(&page("https://example.com/a")).unwrap();
    assert_eq!(hit.result.risk_score, 75.0);
  }
}
