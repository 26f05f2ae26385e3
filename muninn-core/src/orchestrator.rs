use crate::cache::{CacheEntry, CacheKey, ScanCache};
use crate::classifier::{classify, Classification};
use crate::config::InFlightPolicy;
use crate::dispatcher::{DispatchContext, Dispatcher, HostPlatform};
use crate::error::ScanError;
use crate::remote::{RetryPolicy, ScanTransport};
use crate::settings::{Settings, SettingsStore};
use crate::tabs::{TabRegistry, TabToken};
use crate::types::{PageId, ScanResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
  /// User asked for it (popup button, context menu, re-scan).
  Manual,
  /// Page finished loading.
  Automatic,
}

#[derive(Debug, Clone)]
pub struct ScanRequest<'a> {
  pub page: &'a str,
  pub content: &'a str,
  pub trigger: Trigger,
  pub tab: Option<TabToken>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scanned {
  pub page: PageId,
  pub result: Arc<ScanResult>,
  pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
  /// This call performed the remote scan.
  Fresh(Scanned),
  /// Another call for the same page was already in flight; its result.
  Coalesced(Scanned),
  /// Automatic scanning is off; the last known result for the page.
  Cached(CacheEntry),
  /// Automatic scanning is off and nothing is cached.
  Skipped,
}

impl ScanOutcome {
  pub fn result(&self) -> Option<&Arc<ScanResult>> {
    match self {
      ScanOutcome::Fresh(s) | ScanOutcome::Coalesced(s) => Some(&s.result),
      ScanOutcome::Cached(e) => Some(&e.result),
      ScanOutcome::Skipped => None,
    }
  }
}

type SharedOutcome = Result<Arc<ScanResult>, ScanError>;

enum SlotState {
  Pending,
  Resolved(SharedOutcome),
}

/// One remote scan per page at a time; later callers block on the slot.
struct InFlightSlot {
  state: Mutex<SlotState>,
  ready: Condvar,
  waiters: AtomicUsize,
}

impl InFlightSlot {
  fn new() -> Self {
    Self {
      state: Mutex::new(SlotState::Pending),
      ready: Condvar::new(),
      waiters: AtomicUsize::new(0),
    }
  }

  fn resolve(&self, outcome: SharedOutcome) {
    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    if matches!(*state, SlotState::Pending) {
      *state = SlotState::Resolved(outcome);
      self.ready.notify_all();
    }
  }

  fn wait(&self) -> SharedOutcome {
    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    loop {
      if let SlotState::Resolved(outcome) = &*state {
        return outcome.clone();
      }
      state = self
        .ready
        .wait(state)
        .unwrap_or_else(|p| p.into_inner());
    }
  }
}

/// Clears the in-flight entry even if the leader unwinds, so waiters and
/// later scans never hang on a dead slot.
struct LeaderGuard<'a> {
  owner: &'a Orchestrator,
  page: PageId,
  slot: Arc<InFlightSlot>,
}

impl LeaderGuard<'_> {
  fn finish(self, outcome: SharedOutcome) {
    self.owner.in_flight().remove(&self.page);
    self.slot.resolve(outcome);
  }
}

impl Drop for LeaderGuard<'_> {
  fn drop(&mut self) {
    let mut in_flight = self.owner.in_flight();
    if in_flight
      .get(&self.page)
      .is_some_and(|s| Arc::ptr_eq(s, &self.slot))
    {
      in_flight.remove(&self.page);
    }
    drop(in_flight);
    self
      .slot
      .resolve(Err(ScanError::transport("scan aborted before completion")));
  }
}

enum Claim {
  Leader(Arc<InFlightSlot>),
  Follower(Arc<InFlightSlot>),
}

pub struct Orchestrator {
  settings: Arc<SettingsStore>,
  cache: Arc<ScanCache>,
  transport: Arc<dyn ScanTransport>,
  tabs: Arc<TabRegistry>,
  dispatcher: Dispatcher,
  retry: RetryPolicy,
  in_flight_policy: InFlightPolicy,
  in_flight: Mutex<HashMap<PageId, Arc<InFlightSlot>>>,
}

impl Orchestrator {
  pub fn new(
    settings: Arc<SettingsStore>,
    cache: Arc<ScanCache>,
    transport: Arc<dyn ScanTransport>,
    host: Arc<dyn HostPlatform>,
    tabs: Arc<TabRegistry>,
  ) -> Self {
    Self {
      settings,
      cache,
      transport,
      dispatcher: Dispatcher::new(host, tabs.clone()),
      tabs,
      retry: RetryPolicy::default(),
      in_flight_policy: InFlightPolicy::default(),
      in_flight: Mutex::new(HashMap::new()),
    }
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_in_flight_policy(mut self, policy: InFlightPolicy) -> Self {
    self.in_flight_policy = policy;
    self
  }

  pub fn settings(&self) -> &SettingsStore {
    &self.settings
  }

  pub fn cache(&self) -> &ScanCache {
    &self.cache
  }

  pub fn tabs(&self) -> &TabRegistry {
    &self.tabs
  }

  pub fn transport(&self) -> &dyn ScanTransport {
    self.transport.as_ref()
  }

  pub fn scan(&self, req: ScanRequest<'_>) -> Result<ScanOutcome, ScanError> {
    let page = PageId::parse(req.page)?;
    if req.content.trim().is_empty() {
      return Err(ScanError::InvalidInput("missing page content".to_string()));
    }

    let settings = self.settings.current();
    if req.trigger == Trigger::Automatic && !settings.automatic_scan {
      let cached = self.cache.get(&CacheKey::Page(page.clone()));
      tracing::debug!(
        page = %page.log_label(),
        cached = cached.is_some(),
        "automatic scan disabled; not contacting scan service"
      );
      return Ok(match cached {
        Some(entry) => ScanOutcome::Cached(entry),
        None => ScanOutcome::Skipped,
      });
    }

    match self.claim(&page)? {
      Claim::Follower(slot) => {
        tracing::debug!(page = %page.log_label(), "joining in-flight scan");
        let result = slot.wait()?;
        Ok(ScanOutcome::Coalesced(self.follow_up(page, result, &settings, req.tab)))
      }
      Claim::Leader(slot) => {
        let guard = LeaderGuard {
          owner: self,
          page: page.clone(),
          slot,
        };
        self.lead(guard, page, req, &settings)
      }
    }
  }

  fn lead(
    &self,
    guard: LeaderGuard<'_>,
    page: PageId,
    req: ScanRequest<'_>,
    settings: &Settings,
  ) -> Result<ScanOutcome, ScanError> {
    let label = page.log_label();
    let outcome = self
      .retry
      .run(&label, |_| {
        self
          .transport
          .scan(&settings.api_endpoint, page.as_str(), req.content)
      })
      .map(Arc::new);

    let result = match outcome {
      Ok(result) => result,
      Err(e) => {
        tracing::warn!(
          page = %label,
          trigger = ?req.trigger,
          error = %e,
          "scan failed; cache left untouched"
        );
        guard.finish(Err(e.clone()));
        return Err(e);
      }
    };

    self
      .cache
      .put(CacheKey::Page(page.clone()), CacheEntry::new(result.clone()));
    if let Some(token) = &req.tab {
      self.store_for_tab(token, &result);
    }
    guard.finish(Ok(result.clone()));

    let classification = classify(&result, settings);
    tracing::info!(
      page = %label,
      trigger = ?req.trigger,
      risk_score = result.risk_score,
      tier = ?classification.tier,
      "scan complete"
    );

    let report = self.dispatcher.dispatch(
      &DispatchContext {
        page: page.clone(),
        tab: req.tab,
      },
      &classification,
      &result,
    );
    tracing::debug!(page = %label, report = ?report, "dispatch finished");

    Ok(ScanOutcome::Fresh(Scanned {
      page,
      result,
      classification,
    }))
  }

  /// A coalesced caller only updates its own tab; the leader already
  /// notified and showed the overlay.
  fn follow_up(
    &self,
    page: PageId,
    result: Arc<ScanResult>,
    settings: &Settings,
    tab: Option<TabToken>,
  ) -> Scanned {
    let classification = classify(&result, settings);
    if let Some(token) = tab {
      if self.store_for_tab(&token, &result) {
        self.dispatcher.apply_badge(token.tab_id, &classification);
      }
    }
    Scanned {
      page,
      result,
      classification,
    }
  }

  /// Tab-keyed write, skipped once the tab has closed or navigated away.
  fn store_for_tab(&self, token: &TabToken, result: &Arc<ScanResult>) -> bool {
    self
      .tabs
      .while_live(token, || {
        self
          .cache
          .put(CacheKey::Tab(token.tab_id), CacheEntry::new(result.clone()))
      })
      .is_some()
  }

  fn claim(&self, page: &PageId) -> Result<Claim, ScanError> {
    let mut in_flight = self.in_flight();
    if let Some(slot) = in_flight.get(page) {
      return match self.in_flight_policy {
        InFlightPolicy::Coalesce => {
          slot.waiters.fetch_add(1, Ordering::SeqCst);
          Ok(Claim::Follower(slot.clone()))
        }
        InFlightPolicy::Reject => Err(ScanError::ScanInProgress(page.to_string())),
      };
    }
    let slot = Arc::new(InFlightSlot::new());
    in_flight.insert(page.clone(), slot.clone());
    Ok(Claim::Leader(slot))
  }

  fn in_flight(&self) -> MutexGuard<'_, HashMap<PageId, Arc<InFlightSlot>>> {
    self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
  }

  pub fn in_flight_count(&self) -> usize {
    self.in_flight().len()
  }

  /// Callers currently coalesced onto the in-flight scan for `page`.
  pub fn waiting_on(&self, page: &str) -> usize {
    let Ok(page) = PageId::parse(page) else {
      return 0;
    };
    self
      .in_flight()
      .get(&page)
      .map(|slot| slot.waiters.load(Ordering::SeqCst))
      .unwrap_or(0)
  }
}
