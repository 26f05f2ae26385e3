use crate::error::ScanError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const CATEGORY_PHISHING: &str = "phishing";
pub const CATEGORY_XSS: &str = "xss";
pub const CATEGORY_CSRF: &str = "csrf";

pub type TabId = u32;

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  #[default]
  Low,
  Medium,
  High,
}

impl Severity {
  pub fn as_str(&self) -> &'static str {
    match self {
      Severity::Low => "low",
      Severity::Medium => "medium",
      Severity::High => "high",
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryFinding {
  #[serde(default)]
  pub present: bool,

  #[serde(default)]
  pub severity: Severity,

  #[serde(default)]
  pub factors: Vec<String>,

  #[serde(default)]
  pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeBrowsingThreat {
  #[serde(rename = "type", alias = "threatType", alias = "threat_type", default)]
  pub threat_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeBrowsing {
  #[serde(default)]
  pub threats: Vec<SafeBrowsingThreat>,

  #[serde(default)]
  pub recommendations: Vec<String>,
}

/// Risk assessment returned by the remote scan service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
  pub risk_score: f64,

  #[serde(default)]
  pub categories: BTreeMap<String, CategoryFinding>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub safe_browsing: Option<SafeBrowsing>,
}

impl ScanResult {
  pub fn category(&self, name: &str) -> Option<&CategoryFinding> {
    self.categories.get(name)
  }

  pub fn has_safe_browsing_threats(&self) -> bool {
    self
      .safe_browsing
      .as_ref()
      .is_some_and(|sb| !sb.threats.is_empty())
  }

  pub fn tier(&self) -> RiskTier {
    RiskTier::from_score(self.risk_score)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
  Safe,
  Warning,
  Danger,
}

impl RiskTier {
  pub const WARNING_THRESHOLD: f64 = 30.0;
  pub const DANGER_THRESHOLD: f64 = 70.0;

  pub fn from_score(score: f64) -> Self {
    if score >= Self::DANGER_THRESHOLD {
      RiskTier::Danger
    } else if score >= Self::WARNING_THRESHOLD {
      RiskTier::Warning
    } else {
      RiskTier::Safe
    }
  }
}

/// Canonical URL of a scannable page: `http`/`https` only, fragment dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageId(String);

impl PageId {
  pub fn parse(raw: &str) -> Result<Self, ScanError> {
    let raw = raw.trim();
    if raw.is_empty() {
      return Err(ScanError::InvalidInput("missing page URL".to_string()));
    }

    let mut url = Url::parse(raw)
      .map_err(|e| ScanError::InvalidInput(format!("unparsable page URL: {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
      return Err(ScanError::InvalidInput(format!(
        "cannot scan {} pages",
        url.scheme()
      )));
    }
    url.set_fragment(None);
    Ok(Self(url.to_string()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn log_label(&self) -> String {
    url_label_for_log(&self.0)
  }
}

impl fmt::Display for PageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl TryFrom<String> for PageId {
  type Error = ScanError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    PageId::parse(&value)
  }
}

impl From<PageId> for String {
  fn from(value: PageId) -> Self {
    value.0
  }
}

pub fn url_label_for_log(url: &str) -> String {
  // Paths and queries can carry session tokens; logs only get the host.
  Url::parse(url)
    .ok()
    .and_then(|u| u.host_str().map(str::to_string))
    .unwrap_or_else(|| "<redacted>".to_string())
}

pub fn now_unix_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}
