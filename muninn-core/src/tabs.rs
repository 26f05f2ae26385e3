use crate::types::TabId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Identifies one page lifetime inside a tab. A navigation or a tab close
/// makes every earlier token stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabToken {
  pub tab_id: TabId,
  generation: u64,
}

#[derive(Debug, Default)]
pub struct TabRegistry {
  live: Mutex<HashMap<TabId, u64>>,
  next_generation: AtomicU64,
}

impl TabRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Called on page-load-complete.
  pub fn open(&self, tab_id: TabId) -> TabToken {
    let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
    self.live().insert(tab_id, generation);
    TabToken { tab_id, generation }
  }

  /// Like [`open`](Self::open), running `on_navigate` before any
  /// [`while_live`](Self::while_live) caller can see the new token.
  pub fn open_with(&self, tab_id: TabId, on_navigate: impl FnOnce()) -> TabToken {
    let mut live = self.live();
    let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
    live.insert(tab_id, generation);
    on_navigate();
    TabToken { tab_id, generation }
  }

  pub fn close(&self, tab_id: TabId) -> bool {
    self.close_with(tab_id, || {})
  }

  /// Closes the tab and runs `on_close` under the registry lock, so it
  /// cannot interleave with a `while_live` body for the same tab.
  pub fn close_with(&self, tab_id: TabId, on_close: impl FnOnce()) -> bool {
    let mut live = self.live();
    let was_open = live.remove(&tab_id).is_some();
    on_close();
    was_open
  }

  /// Runs `f` only if `token` is still live, holding off closes and
  /// navigations until it returns.
  pub fn while_live<R>(&self, token: &TabToken, f: impl FnOnce() -> R) -> Option<R> {
    let live = self.live();
    if live.get(&token.tab_id) != Some(&token.generation) {
      return None;
    }
    Some(f())
  }

  /// Current token for a tab, if it has loaded a page since it was opened.
  pub fn current(&self, tab_id: TabId) -> Option<TabToken> {
    self
      .live()
      .get(&tab_id)
      .map(|generation| TabToken {
        tab_id,
        generation: *generation,
      })
  }

  pub fn is_live(&self, token: &TabToken) -> bool {
    self.live().get(&token.tab_id) == Some(&token.generation)
  }

  fn live(&self) -> MutexGuard<'_, HashMap<TabId, u64>> {
    self.live.lock().unwrap_or_else(|p| p.into_inner())
  }
}
