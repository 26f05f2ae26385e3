use anyhow::Context;
use muninn_core::dispatcher::{BadgeDirective, HostPlatform, NotificationDirective, OverlayDirective};
use muninn_core::messages::{EventOutcome, HostEvent, Request, Response, Router};
use muninn_core::{config, logging, paths};
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

/// One line written to stdout.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
  Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    response: Response,
  },
  SetBadge {
    badge: BadgeDirective,
  },
  Notify {
    notification: NotificationDirective,
  },
  ShowOverlay {
    overlay: OverlayDirective,
  },
}

/// Serializes whole lines onto a shared writer so concurrent handlers never
/// interleave partial output.
pub struct Channel {
  out: Mutex<Box<dyn Write + Send>>,
}

impl Channel {
  pub fn new(out: Box<dyn Write + Send>) -> Self {
    Self {
      out: Mutex::new(out),
    }
  }

  pub fn emit(&self, message: &Outbound) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(message).context("encode outbound message")?;
    line.push(b'\n');

    let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
    out.write_all(&line).context("write outbound message")?;
    out.flush().context("flush outbound message")?;
    Ok(())
  }
}

/// Forwards visual effects to the extension as command lines.
pub struct LineHost {
  channel: Arc<Channel>,
}

impl LineHost {
  pub fn new(channel: Arc<Channel>) -> Self {
    Self { channel }
  }
}

impl HostPlatform for LineHost {
  fn set_badge(&self, badge: &BadgeDirective) -> anyhow::Result<()> {
    self.channel.emit(&Outbound::SetBadge {
      badge: badge.clone(),
    })
  }

  fn notify(&self, notification: &NotificationDirective) -> anyhow::Result<()> {
    self.channel.emit(&Outbound::Notify {
      notification: notification.clone(),
    })
  }

  fn show_overlay(&self, overlay: &OverlayDirective) -> anyhow::Result<()> {
    self.channel.emit(&Outbound::ShowOverlay {
      overlay: overlay.clone(),
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
  Request { id: Option<Value>, request: Request },
  Event(HostEvent),
}

/// Lines carrying `action` are requests (answered), lines carrying `event`
/// are lifecycle events (never answered).
pub fn parse_line(line: &str) -> anyhow::Result<Inbound> {
  let mut value: Value = serde_json::from_str(line).context("parse message line")?;
  let Some(obj) = value.as_object_mut() else {
    anyhow::bail!("message must be a JSON object");
  };

  if obj.contains_key("action") {
    let id = obj.remove("id");
    let request = serde_json::from_value(value).context("decode request")?;
    return Ok(Inbound::Request { id, request });
  }
  if obj.contains_key("event") {
    let event = serde_json::from_value(value).context("decode host event")?;
    return Ok(Inbound::Event(event));
  }
  anyhow::bail!("message has neither `action` nor `event`")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
  pub requests: usize,
  pub events: usize,
  pub rejected: usize,
}

/// Reads messages until `input` closes. Requests and events that may hit the
/// network run on their own threads; the rest are handled inline. Returns
/// once every spawned handler has finished.
pub fn run_loop(input: impl BufRead, channel: &Channel, router: &Router) -> anyhow::Result<LoopStats> {
  let mut stats = LoopStats::default();

  std::thread::scope(|scope| -> anyhow::Result<()> {
    for line in input.lines() {
      let line = line.context("read stdin")?;
      if line.trim().is_empty() {
        continue;
      }

      match parse_line(&line) {
        Ok(Inbound::Request { id, request }) => {
          stats.requests += 1;
          if matches!(request, Request::ScanPage { .. } | Request::ShowEducation { .. }) {
            scope.spawn(move || answer(channel, router, id, request));
          } else {
            answer(channel, router, id, request);
          }
        }
        Ok(Inbound::Event(HostEvent::TabUpdated {
          tab_id,
          url,
          status,
          html: Some(html),
        })) => {
          stats.events += 1;
          // The new tab lifetime starts here, in delivery order; only the
          // scan itself leaves the reader thread.
          if let Some(token) = router.open_tab(tab_id, &url, &status) {
            scope.spawn(move || record(router.scan_loaded_page(token, &url, &html)));
          }
        }
        Ok(Inbound::Event(event)) => {
          stats.events += 1;
          record(router.handle_event(event));
        }
        Err(e) => {
          stats.rejected += 1;
          tracing::warn!(error = ?e, "rejected message line (continuing)");
          if let Err(e) = channel.emit(&Outbound::Response {
            id: None,
            response: Response::failed(format!("{e:#}")),
          }) {
            tracing::warn!(error = ?e, "failed to report rejected line");
          }
        }
      }
    }
    Ok(())
  })?;

  tracing::info!(
    requests = stats.requests,
    events = stats.events,
    rejected = stats.rejected,
    "input closed; message loop finished"
  );
  Ok(stats)
}

fn answer(channel: &Channel, router: &Router, id: Option<Value>, request: Request) {
  let response = router.handle(request);
  if let Err(e) = channel.emit(&Outbound::Response { id, response }) {
    tracing::warn!(error = ?e, "failed to write response (continuing)");
  }
}

fn record(outcome: EventOutcome) {
  match outcome {
    EventOutcome::ScanFailed(error) => tracing::debug!(%error, "event scan failed"),
    outcome => tracing::trace!(outcome = ?outcome, "event handled"),
  }
}

/// Background-context entry point: config, logging, then the stdio loop.
pub fn run_stdio() -> anyhow::Result<()> {
  let base = paths::base_dir()?;
  let cfg = config::load_or_create_default(&paths::config_path(&base))?;

  logging::init_file_and_stderr(
    &paths::logs_dir(&base),
    &cfg.logging.level,
    cfg.logging.retention_days,
  )?;

  let channel = Arc::new(Channel::new(Box::new(std::io::stdout())));
  let router = muninn_core::build_router(&base, &cfg, Arc::new(LineHost::new(channel.clone())))
    .context("build message router")?;

  tracing::info!(base = %base.display(), "muninn host started");
  let stdin = std::io::stdin();
  run_loop(stdin.lock(), &channel, &router)?;
  tracing::info!("muninn host stopped");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use muninn_core::cache::{CacheKey, ScanCache};
  use muninn_core::error::ScanError;
  use muninn_core::remote::{RetryPolicy, ScanTransport};
  use muninn_core::settings::SettingsStore;
  use muninn_core::storage::MemoryStore;
  use muninn_core::tabs::TabRegistry;
  use muninn_core::types::{PageId, ScanResult};
  use muninn_core::Orchestrator;
  use serde_json::json;
  use std::io::Cursor;

  #[derive(Clone, Default)]
  struct SharedBuf(Arc<Mutex<Vec<u8>>>);

  impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  impl SharedBuf {
    fn lines(&self) -> Vec<Value> {
      let bytes = self.0.lock().unwrap().clone();
      String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
    }
  }

  struct FixedScore(f64);

  impl ScanTransport for FixedScore {
    fn scan(&self, _endpoint: &str, _url: &str, _html: &str) -> Result<ScanResult, ScanError> {
      Ok(ScanResult {
        risk_score: self.0,
        ..ScanResult::default()
      })
    }

    fn educate(&self, _endpoint: &str, topic: &str) -> Result<Value, ScanError> {
      Ok(json!({ "topic": topic }))
    }
  }

  fn setup(score: f64) -> (SharedBuf, Arc<Channel>, Router) {
    let buf = SharedBuf::default();
    let channel = Arc::new(Channel::new(Box::new(buf.clone())));
    let settings = Arc::new(SettingsStore::new(Arc::new(MemoryStore::new())));
    let orchestrator = Orchestrator::new(
      settings,
      Arc::new(ScanCache::in_memory()),
      Arc::new(FixedScore(score)),
      Arc::new(LineHost::new(channel.clone())),
      Arc::new(TabRegistry::new()),
    )
    .with_retry(RetryPolicy::none());
    (buf, channel, Router::new(Arc::new(orchestrator)))
  }

  #[test]
  fn parse_line_splits_requests_and_events() {
    let parsed = parse_line(r#"{"id": 7, "action": "getSettings"}"#).unwrap();
    assert_eq!(
      parsed,
      Inbound::Request {
        id: Some(json!(7)),
        request: Request::GetSettings
      }
    );

    let parsed = parse_line(r#"{"event": "tabRemoved", "tabId": 2}"#).unwrap();
    assert_eq!(parsed, Inbound::Event(HostEvent::TabRemoved { tab_id: 2 }));

    assert!(parse_line("[1, 2]").is_err());
    assert!(parse_line(r#"{"id": 1}"#).is_err());
    assert!(parse_line(r#"{"action": "selfDestruct"}"#).is_err());
  }

  #[test]
  fn loop_answers_requests_and_emits_effects() {
    let (buf, channel, router) = setup(90.0);
    let input = [
      r#"{"id": 1, "action": "getSettings"}"#,
      r#"{"id": 2, "action": "scanPage", "url": "https://example.com", "html": "<html></html>", "tabId": 4}"#,
      "",
    ]
    .join("\n");

    let stats = run_loop(Cursor::new(input), &channel, &router).unwrap();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.rejected, 0);

    let lines = buf.lines();
    let settings = lines
      .iter()
      .find(|l| l["type"] == "response" && l["id"] == 1)
      .unwrap();
    assert_eq!(settings["response"]["settings"]["automaticScan"], json!(true));

    let scan = lines
      .iter()
      .find(|l| l["type"] == "response" && l["id"] == 2)
      .unwrap();
    assert_eq!(scan["response"]["success"], json!(true));
    assert_eq!(scan["response"]["summary"], json!("High Risk!"));

    let badge = lines.iter().find(|l| l["type"] == "setBadge").unwrap();
    assert_eq!(badge["badge"]["tabId"], json!(4));
    assert_eq!(badge["badge"]["text"], json!("HIGH"));
    assert!(lines.iter().any(|l| l["type"] == "notify"));
    assert!(lines.iter().any(|l| l["type"] == "showOverlay"));
  }

  #[test]
  fn tab_closed_right_after_load_stays_closed() {
    for _ in 0..20 {
      let (buf, channel, router) = setup(90.0);
      let input = [
        r#"{"event": "tabUpdated", "tabId": 1, "url": "https://example.com", "status": "complete", "html": "<html></html>"}"#,
        r#"{"event": "tabRemoved", "tabId": 1}"#,
      ]
      .join("\n");

      let stats = run_loop(Cursor::new(input), &channel, &router).unwrap();
      assert_eq!(stats.events, 2);

      let orchestrator = router.orchestrator();
      assert_eq!(orchestrator.tabs().current(1), None);
      assert!(orchestrator.cache().get(&CacheKey::Tab(1)).is_none());
      // URL results outlive the tab.
      assert!(orchestrator
        .cache()
        .get(&CacheKey::Page(PageId::parse("https://example.com").unwrap()))
        .is_some());
      assert!(buf.lines().iter().all(|l| l["type"] != "response"));
    }
  }

  #[test]
  fn bad_lines_are_reported_and_skipped() {
    let (buf, channel, router) = setup(10.0);
    let input = "not json\n{\"event\": \"tabRemoved\", \"tabId\": 1}\n";

    let stats = run_loop(Cursor::new(input), &channel, &router).unwrap();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.events, 1);

    let lines = buf.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["response"]["success"], json!(false));
    assert!(lines[0].get("id").is_none());
  }
}
