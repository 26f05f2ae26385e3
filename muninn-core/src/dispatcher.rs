use crate::classifier::Classification;
use crate::tabs::{TabRegistry, TabToken};
use crate::types::{PageId, ScanResult, Severity, TabId, CATEGORY_PHISHING};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const OVERLAY_MAX_FACTORS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeDirective {
  pub tab_id: TabId,
  pub color: String,
  pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDirective {
  pub notification_id: String,
  pub title: String,
  pub message: String,
  pub priority: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlaySection {
  pub title: String,
  pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayDirective {
  pub tab_id: TabId,
  pub headline: String,
  pub sections: Vec<OverlaySection>,
}

/// Visual side effects the host platform can apply. Every call must be safe
/// to repeat with the same arguments.
pub trait HostPlatform: Send + Sync {
  fn set_badge(&self, badge: &BadgeDirective) -> anyhow::Result<()>;
  fn notify(&self, notification: &NotificationDirective) -> anyhow::Result<()>;
  fn show_overlay(&self, overlay: &OverlayDirective) -> anyhow::Result<()>;
}

/// Where a classified result should land.
#[derive(Debug, Clone)]
pub struct DispatchContext {
  pub page: PageId,
  pub tab: Option<TabToken>,
}

/// What the dispatcher actually did; handy for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
  pub badge_applied: bool,
  pub notified: bool,
  pub overlay_shown: bool,
  pub stale_tab: bool,
}

pub struct Dispatcher {
  host: Arc<dyn HostPlatform>,
  tabs: Arc<TabRegistry>,
}

impl Dispatcher {
  pub fn new(host: Arc<dyn HostPlatform>, tabs: Arc<TabRegistry>) -> Self {
    Self { host, tabs }
  }

  /// Applies badge, notification and overlay. Host failures are logged and
  /// swallowed; a stale tab token suppresses every effect.
  pub fn dispatch(
    &self,
    ctx: &DispatchContext,
    classification: &Classification,
    result: &ScanResult,
  ) -> DispatchReport {
    let mut report = DispatchReport::default();

    if let Some(token) = &ctx.tab {
      if !self.tabs.is_live(token) {
        tracing::info!(
          tab_id = token.tab_id,
          page = %ctx.page.log_label(),
          "dropping scan result for stale tab"
        );
        report.stale_tab = true;
        return report;
      }
      report.badge_applied = self.apply_badge(token.tab_id, classification);
    }

    report.notified = self.apply_notification(classification, ctx);

    if let Some(token) = &ctx.tab {
      report.overlay_shown = self.apply_overlay(token.tab_id, classification, result);
    }

    report
  }

  pub fn apply_badge(&self, tab_id: TabId, classification: &Classification) -> bool {
    let badge = BadgeDirective {
      tab_id,
      color: classification.badge_color.clone(),
      text: classification.badge_text.clone(),
    };
    match self.host.set_badge(&badge) {
      Ok(()) => true,
      Err(e) => {
        tracing::warn!(tab_id, error = ?e, "badge update failed (continuing)");
        false
      }
    }
  }

  pub fn apply_notification(&self, classification: &Classification, ctx: &DispatchContext) -> bool {
    if !classification.should_notify {
      return false;
    }

    let notification = NotificationDirective {
      notification_id: uuid::Uuid::new_v4().to_string(),
      title: "High Risk Website Detected".to_string(),
      message: format!(
        "Muninn has detected security risks on {}. Click to see details.",
        ctx.page
      ),
      priority: 2,
    };
    match self.host.notify(&notification) {
      Ok(()) => {
        tracing::info!(
          page = %ctx.page.log_label(),
          notification_id = %notification.notification_id,
          "high risk notification sent"
        );
        true
      }
      Err(e) => {
        tracing::warn!(page = %ctx.page.log_label(), error = ?e, "notification failed (continuing)");
        false
      }
    }
  }

  pub fn apply_overlay(
    &self,
    tab_id: TabId,
    classification: &Classification,
    result: &ScanResult,
  ) -> bool {
    if !classification.should_show_overlay {
      return false;
    }

    let overlay = overlay_for(tab_id, result);
    match self.host.show_overlay(&overlay) {
      Ok(()) => true,
      Err(e) => {
        tracing::warn!(tab_id, error = ?e, "warning overlay failed (continuing)");
        false
      }
    }
  }
}

pub fn overlay_for(tab_id: TabId, result: &ScanResult) -> OverlayDirective {
  let mut sections = Vec::new();

  if let Some(phishing) = result
    .category(CATEGORY_PHISHING)
    .filter(|f| f.present && f.severity == Severity::High)
  {
    sections.push(OverlaySection {
      title: "Phishing Risk".to_string(),
      lines: phishing
        .factors
        .iter()
        .take(OVERLAY_MAX_FACTORS)
        .cloned()
        .collect(),
    });
  }

  if result.has_safe_browsing_threats() {
    sections.push(OverlaySection {
      title: "Malware Risk".to_string(),
      lines: vec!["This site has been flagged by Google Safe Browsing.".to_string()],
    });
  }

  OverlayDirective {
    tab_id,
    headline: "Muninn has detected high-risk security issues on this website".to_string(),
    sections,
  }
}
