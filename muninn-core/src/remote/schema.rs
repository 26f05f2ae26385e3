use crate::error::ScanError;
use crate::types::{
  CategoryFinding, SafeBrowsing, ScanResult, Severity, CATEGORY_CSRF, CATEGORY_PHISHING,
  CATEGORY_XSS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct ScanRequestBody<'a> {
  pub url: &'a str,
  pub html: &'a str,
}

/// Accepts both the normalized `categories` map and the per-category blocks
/// (`phishing`, `xss`, `csrf`) older service builds return.
#[derive(Debug, Deserialize)]
struct WireScanResponse {
  #[serde(alias = "riskScore")]
  risk_score: Option<f64>,

  #[serde(default)]
  categories: BTreeMap<String, CategoryFinding>,

  #[serde(default)]
  phishing: Option<LegacyPhishing>,

  #[serde(default)]
  xss: Option<LegacyVulnerability>,

  #[serde(default)]
  csrf: Option<LegacyVulnerability>,

  #[serde(default, alias = "safeBrowsing")]
  safe_browsing: Option<SafeBrowsing>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyPhishing {
  #[serde(default)]
  risk_level: Option<String>,
  #[serde(default)]
  risk_factors: Vec<String>,
  #[serde(default)]
  recommendations: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyVulnerability {
  #[serde(default)]
  vulnerable: bool,
  #[serde(default)]
  risk_factors: Vec<String>,
  #[serde(default)]
  recommendations: Vec<String>,
}

pub fn decode_scan_response(body: &[u8]) -> Result<ScanResult, ScanError> {
  let wire: WireScanResponse = serde_json::from_slice(body)
    .map_err(|e| ScanError::status(200, format!("malformed scan response: {e}")))?;

  let score = wire
    .risk_score
    .ok_or_else(|| ScanError::status(200, "scan response has no risk score"))?;

  let mut categories = wire.categories;

  if let Some(p) = wire.phishing {
    if let Some(level) = p.risk_level.as_deref() {
      let severity = parse_severity(level);
      categories
        .entry(CATEGORY_PHISHING.to_string())
        .or_insert(CategoryFinding {
          present: severity != Severity::Low,
          severity,
          factors: p.risk_factors,
          recommendations: p.recommendations,
        });
    }
  }

  if let Some(x) = wire.xss {
    categories
      .entry(CATEGORY_XSS.to_string())
      .or_insert_with(|| legacy_finding(x, Severity::High));
  }

  if let Some(c) = wire.csrf {
    categories
      .entry(CATEGORY_CSRF.to_string())
      .or_insert_with(|| legacy_finding(c, Severity::Medium));
  }

  Ok(ScanResult {
    risk_score: score.clamp(0.0, 100.0),
    categories,
    safe_browsing: wire.safe_browsing,
  })
}

fn legacy_finding(v: LegacyVulnerability, severity_when_present: Severity) -> CategoryFinding {
  CategoryFinding {
    present: v.vulnerable,
    severity: if v.vulnerable {
      severity_when_present
    } else {
      Severity::Low
    },
    factors: v.risk_factors,
    recommendations: v.recommendations,
  }
}

fn parse_severity(raw: &str) -> Severity {
  match raw.trim().to_ascii_lowercase().as_str() {
    "high" => Severity::High,
    "medium" => Severity::Medium,
    _ => Severity::Low,
  }
}
