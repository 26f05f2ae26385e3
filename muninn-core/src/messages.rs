use crate::cache::{CacheEntry, CacheKey};
use crate::classifier::{classify, threat_sections, Classification, ThreatSection};
use crate::orchestrator::{Orchestrator, ScanOutcome, ScanRequest, Trigger};
use crate::remote::validate_topic;
use crate::settings::{Settings, SettingsPatch};
use crate::tabs::TabToken;
use crate::types::{PageId, ScanResult, TabId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request/response messages from the popup, options page or content script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
  GetSettings,
  SaveSettings {
    settings: SettingsPatch,
  },
  ScanPage {
    url: String,
    html: String,
    #[serde(default, rename = "tabId")]
    tab_id: Option<TabId>,
  },
  GetScanResults {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "tabId")]
    tab_id: Option<TabId>,
  },
  ShowEducation {
    #[serde(rename = "threatType")]
    threat_type: String,
  },
}

/// Fire-and-forget page lifecycle events from the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
  TabUpdated {
    #[serde(rename = "tabId")]
    tab_id: TabId,
    url: String,
    status: String,
    /// Page snapshot, when the content script already captured it.
    #[serde(default)]
    html: Option<String>,
  },
  TabRemoved {
    #[serde(rename = "tabId")]
    tab_id: TabId,
  },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
  pub success: bool,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub settings: Option<Settings>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub results: Option<ScanResult>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub classification: Option<Classification>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub threats: Vec<ThreatSection>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scanned_at_unix_ms: Option<u64>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub education: Option<serde_json::Value>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl Response {
  pub fn ok() -> Self {
    Self {
      success: true,
      ..Self::default()
    }
  }

  pub fn failed(error: impl std::fmt::Display) -> Self {
    Self {
      success: false,
      error: Some(error.to_string()),
      ..Self::default()
    }
  }

  fn with_result(
    mut self,
    result: &ScanResult,
    classification: Classification,
    settings: &Settings,
  ) -> Self {
    self.summary = Some(classification.summary().to_string());
    self.threats = threat_sections(result, settings);
    self.classification = Some(classification);
    self.results = Some(result.clone());
    self
  }
}

/// What happened to a lifecycle event; the host only logs it.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
  Ignored,
  TabOpened,
  Scanned(ScanOutcome),
  ScanFailed(String),
  TabClosed,
}

/// Background-context message handling on top of the orchestrator.
pub struct Router {
  orchestrator: Arc<Orchestrator>,
}

impl Router {
  pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
    Self { orchestrator }
  }

  pub fn orchestrator(&self) -> &Orchestrator {
    &self.orchestrator
  }

  pub fn handle(&self, request: Request) -> Response {
    match request {
      Request::GetSettings => Response {
        settings: Some(self.orchestrator.settings().current()),
        ..Response::ok()
      },
      Request::SaveSettings { settings } => Response {
        settings: Some(self.orchestrator.settings().save(&settings)),
        ..Response::ok()
      },
      Request::ScanPage { url, html, tab_id } => self.scan_page(&url, &html, tab_id),
      Request::GetScanResults { url, tab_id } => self.scan_results(url.as_deref(), tab_id),
      Request::ShowEducation { threat_type } => self.education(&threat_type),
    }
  }

  pub fn handle_event(&self, event: HostEvent) -> EventOutcome {
    match event {
      HostEvent::TabUpdated {
        tab_id,
        url,
        status,
        html,
      } => self.tab_updated(tab_id, &url, &status, html.as_deref()),
      HostEvent::TabRemoved { tab_id } => {
        let cache = self.orchestrator.cache();
        self.orchestrator.tabs().close_with(tab_id, || {
          cache.evict(&CacheKey::Tab(tab_id));
        });
        tracing::debug!(tab_id, "tab closed; tab scan state evicted");
        EventOutcome::TabClosed
      }
    }
  }

  fn scan_page(&self, url: &str, html: &str, tab_id: Option<TabId>) -> Response {
    let tabs = self.orchestrator.tabs();
    let tab = tab_id.map(|id| tabs.current(id).unwrap_or_else(|| tabs.open(id)));

    let outcome = self.orchestrator.scan(ScanRequest {
      page: url,
      content: html,
      trigger: Trigger::Manual,
      tab,
    });

    let settings = self.orchestrator.settings().current();
    match outcome {
      // Report what the dispatcher acted on, not a reclassification.
      Ok(ScanOutcome::Fresh(s) | ScanOutcome::Coalesced(s)) => {
        Response::ok().with_result(&s.result, s.classification, &settings)
      }
      Ok(ScanOutcome::Cached(entry)) => {
        let classification = classify(&entry.result, &settings);
        Response::ok().with_result(&entry.result, classification, &settings)
      }
      Ok(ScanOutcome::Skipped) => Response::ok(),
      Err(e) => Response::failed(e),
    }
  }

  fn scan_results(&self, url: Option<&str>, tab_id: Option<TabId>) -> Response {
    let cache = self.orchestrator.cache();
    let by_page = url
      .and_then(|u| PageId::parse(u).ok())
      .and_then(|page| cache.get(&CacheKey::Page(page)));
    let entry: Option<CacheEntry> =
      by_page.or_else(|| tab_id.and_then(|id| cache.get(&CacheKey::Tab(id))));

    match entry {
      Some(entry) => {
        let settings = self.orchestrator.settings().current();
        let classification = classify(&entry.result, &settings);
        Response {
          scanned_at_unix_ms: Some(entry.scanned_at_unix_ms),
          ..Response::ok().with_result(&entry.result, classification, &settings)
        }
      }
      None => Response::ok(),
    }
  }

  fn education(&self, topic: &str) -> Response {
    let settings = self.orchestrator.settings().current();
    if !settings.enable_education_mode {
      return Response::failed("education mode is disabled");
    }
    if let Err(e) = validate_topic(topic) {
      return Response::failed(e);
    }

    match self
      .orchestrator
      .transport()
      .educate(&settings.api_endpoint, topic)
    {
      Ok(payload) => Response {
        education: Some(payload),
        ..Response::ok()
      },
      Err(e) => {
        tracing::warn!(topic, error = %e, "failed to fetch education content");
        Response::failed(e)
      }
    }
  }

  fn tab_updated(&self, tab_id: TabId, url: &str, status: &str, html: Option<&str>) -> EventOutcome {
    let Some(token) = self.open_tab(tab_id, url, status) else {
      return EventOutcome::Ignored;
    };
    match html {
      Some(html) => self.scan_loaded_page(token, url, html),
      None => EventOutcome::TabOpened,
    }
  }

  /// First half of `tabUpdated`: on a completed http(s) load, starts a new
  /// page lifetime for the tab and drops its old result. Must run in
  /// delivery order with the tab's other events.
  pub fn open_tab(&self, tab_id: TabId, url: &str, status: &str) -> Option<TabToken> {
    if status != "complete" || !(url.starts_with("http://") || url.starts_with("https://")) {
      return None;
    }
    let cache = self.orchestrator.cache();
    Some(self.orchestrator.tabs().open_with(tab_id, || {
      cache.evict(&CacheKey::Tab(tab_id));
    }))
  }

  /// Second half of `tabUpdated`: the automatic scan for the page `token`
  /// was opened for. Safe to run off the reader thread.
  pub fn scan_loaded_page(&self, token: TabToken, url: &str, html: &str) -> EventOutcome {
    match self.orchestrator.scan(ScanRequest {
      page: url,
      content: html,
      trigger: Trigger::Automatic,
      tab: Some(token),
    }) {
      Ok(outcome) => EventOutcome::Scanned(outcome),
      Err(e) => {
        tracing::warn!(tab_id = token.tab_id, error = %e, "automatic scan failed; keeping previous state");
        EventOutcome::ScanFailed(e.to_string())
      }
    }
  }
}
