#![allow(dead_code)]

use muninn_core::cache::ScanCache;
use muninn_core::dispatcher::{BadgeDirective, HostPlatform, NotificationDirective, OverlayDirective};
use muninn_core::error::ScanError;
use muninn_core::remote::{RetryPolicy, ScanTransport};
use muninn_core::settings::{Settings, SettingsPatch, SettingsStore};
use muninn_core::storage::MemoryStore;
use muninn_core::tabs::TabRegistry;
use muninn_core::types::{CategoryFinding, ScanResult, Severity};
use muninn_core::Orchestrator;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub fn scored(score: f64) -> ScanResult {
  ScanResult {
    risk_score: score,
    ..ScanResult::default()
  }
}

pub fn phishing_85() -> ScanResult {
  let mut r = scored(85.0);
  r.categories.insert(
    "phishing".to_string(),
    CategoryFinding {
      present: true,
      severity: Severity::High,
      factors: vec!["suspicious-domain".to_string()],
      recommendations: vec!["leave-site".to_string()],
    },
  );
  r
}

/// Blocks inside `scan` until the test releases it.
pub struct Gate {
  entered_tx: Mutex<Sender<()>>,
  release_rx: Mutex<Receiver<()>>,
}

pub struct GateHandle {
  pub entered: Receiver<()>,
  pub release: Sender<()>,
}

impl GateHandle {
  pub fn wait_entered(&self) {
    self
      .entered
      .recv_timeout(Duration::from_secs(5))
      .expect("transport was never called");
  }

  pub fn open(&self) {
    self.release.send(()).expect("transport gone");
  }
}

pub fn gate() -> (Gate, GateHandle) {
  let (entered_tx, entered) = mpsc::channel();
  let (release, release_rx) = mpsc::channel();
  (
    Gate {
      entered_tx: Mutex::new(entered_tx),
      release_rx: Mutex::new(release_rx),
    },
    GateHandle { entered, release },
  )
}

#[derive(Default)]
pub struct StubTransport {
  responses: Mutex<VecDeque<Result<ScanResult, ScanError>>>,
  fallback: Mutex<Option<Result<ScanResult, ScanError>>>,
  gate: Option<Gate>,
  calls: AtomicUsize,
  pub education: Mutex<Option<serde_json::Value>>,
  pub seen_endpoints: Mutex<Vec<String>>,
}

impl StubTransport {
  pub fn always(response: Result<ScanResult, ScanError>) -> Self {
    Self {
      fallback: Mutex::new(Some(response)),
      ..Self::default()
    }
  }

  pub fn sequence(responses: Vec<Result<ScanResult, ScanError>>) -> Self {
    Self {
      responses: Mutex::new(responses.into()),
      ..Self::default()
    }
  }

  pub fn gated(response: Result<ScanResult, ScanError>, gate: Gate) -> Self {
    Self {
      fallback: Mutex::new(Some(response)),
      gate: Some(gate),
      ..Self::default()
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl ScanTransport for StubTransport {
  fn scan(&self, endpoint: &str, _url: &str, _html: &str) -> Result<ScanResult, ScanError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.seen_endpoints.lock().unwrap().push(endpoint.to_string());

    if let Some(gate) = &self.gate {
      gate.entered_tx.lock().unwrap().send(()).unwrap();
      gate
        .release_rx
        .lock()
        .unwrap()
        .recv_timeout(Duration::from_secs(5))
        .expect("gate never released");
    }

    if let Some(next) = self.responses.lock().unwrap().pop_front() {
      return next;
    }
    self
      .fallback
      .lock()
      .unwrap()
      .clone()
      .unwrap_or_else(|| Err(ScanError::transport("no stub response left")))
  }

  fn educate(&self, _endpoint: &str, topic: &str) -> Result<serde_json::Value, ScanError> {
    self
      .education
      .lock()
      .unwrap()
      .clone()
      .ok_or_else(|| ScanError::status(404, format!("no content for {topic}")))
  }
}

#[derive(Default)]
pub struct RecordingHost {
  pub badges: Mutex<Vec<BadgeDirective>>,
  pub notifications: Mutex<Vec<NotificationDirective>>,
  pub overlays: Mutex<Vec<OverlayDirective>>,
}

impl HostPlatform for RecordingHost {
  fn set_badge(&self, badge: &BadgeDirective) -> anyhow::Result<()> {
    self.badges.lock().unwrap().push(badge.clone());
    Ok(())
  }

  fn notify(&self, notification: &NotificationDirective) -> anyhow::Result<()> {
    self.notifications.lock().unwrap().push(notification.clone());
    Ok(())
  }

  fn show_overlay(&self, overlay: &OverlayDirective) -> anyhow::Result<()> {
    self.overlays.lock().unwrap().push(overlay.clone());
    Ok(())
  }
}

pub struct Harness {
  pub orchestrator: Arc<Orchestrator>,
  pub transport: Arc<StubTransport>,
  pub host: Arc<RecordingHost>,
  pub cache: Arc<ScanCache>,
  pub tabs: Arc<TabRegistry>,
  pub sync: Arc<MemoryStore>,
}

pub fn instant_retry(max_attempts: u32) -> RetryPolicy {
  RetryPolicy {
    max_attempts,
    initial_backoff_ms: 0,
    max_backoff_ms: 0,
    multiplier: 2.0,
  }
}

pub fn harness(transport: StubTransport) -> Harness {
  harness_with(
    transport,
    SettingsPatch::default(),
    Arc::new(ScanCache::in_memory()),
    |o| o,
  )
}

pub fn harness_with(
  transport: StubTransport,
  patch: SettingsPatch,
  cache: Arc<ScanCache>,
  tweak: impl FnOnce(Orchestrator) -> Orchestrator,
) -> Harness {
  let sync = Arc::new(MemoryStore::new());
  let settings = Arc::new(SettingsStore::new(sync.clone()));
  settings.load();
  if patch != SettingsPatch::default() {
    settings.save(&patch);
  }

  let transport = Arc::new(transport);
  let host = Arc::new(RecordingHost::default());
  let tabs = Arc::new(TabRegistry::new());
  let orchestrator = Orchestrator::new(
    settings,
    cache.clone(),
    transport.clone(),
    host.clone(),
    tabs.clone(),
  )
  .with_retry(instant_retry(1));

  Harness {
    orchestrator: Arc::new(tweak(orchestrator)),
    transport,
    host,
    cache,
    tabs,
    sync,
  }
}

pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
  let deadline = Instant::now() + Duration::from_secs(5);
  while !cond() {
    assert!(Instant::now() < deadline, "timed out waiting for {what}");
    std::thread::sleep(Duration::from_millis(5));
  }
}

pub fn defaults() -> Settings {
  Settings::default()
}
