//! Maps a scan result to a risk tier and the UI directives that follow from it.
//!
//! Everything here is pure: no host calls, no storage, no clock.

use crate::settings::Settings;
use crate::types::{RiskTier, ScanResult, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadgeStyle {
  pub color: &'static str,
  pub text: &'static str,
}

pub const SAFE_BADGE: BadgeStyle = BadgeStyle {
  color: "#38b000",
  text: "OK",
};

pub const WARNING_BADGE: BadgeStyle = BadgeStyle {
  color: "#fb5607",
  text: "MED",
};

pub const DANGER_BADGE: BadgeStyle = BadgeStyle {
  color: "#ff006e",
  text: "HIGH",
};

pub fn badge_for(tier: RiskTier) -> BadgeStyle {
  match tier {
    RiskTier::Safe => SAFE_BADGE,
    RiskTier::Warning => WARNING_BADGE,
    RiskTier::Danger => DANGER_BADGE,
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
  pub tier: RiskTier,
  pub badge_color: String,
  pub badge_text: String,
  pub should_notify: bool,
  pub should_show_overlay: bool,
}

impl Classification {
  /// Popup headline for the tier.
  pub fn summary(&self) -> &'static str {
    match self.tier {
      RiskTier::Safe => "Low Risk",
      RiskTier::Warning => "Medium Risk",
      RiskTier::Danger => "High Risk!",
    }
  }
}

pub fn classify(result: &ScanResult, settings: &Settings) -> Classification {
  let tier = result.tier();
  let badge = badge_for(tier);
  let danger = tier == RiskTier::Danger;

  Classification {
    tier,
    badge_color: badge.color.to_string(),
    badge_text: badge.text.to_string(),
    should_notify: danger && settings.notify_on_high_risk,
    should_show_overlay: danger && settings.enable_education_mode,
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatSection {
  pub category: String,
  pub title: String,
  pub severity: Severity,
  pub factors: Vec<String>,
  pub recommendations: Vec<String>,
  /// Topic slug for the education endpoint.
  pub education_topic: String,
}

/// Present findings the user has not switched off, highest severity first,
/// followed by safe-browsing threats.
pub fn threat_sections(result: &ScanResult, settings: &Settings) -> Vec<ThreatSection> {
  let mut out: Vec<ThreatSection> = result
    .categories
    .iter()
    .filter(|(name, finding)| finding.present && settings.detects(name))
    .map(|(name, finding)| ThreatSection {
      category: name.clone(),
      title: category_title(name),
      severity: finding.severity,
      factors: finding.factors.clone(),
      recommendations: finding.recommendations.clone(),
      education_topic: name.clone(),
    })
    .collect();
  out.sort_by(|a, b| b.severity.cmp(&a.severity));

  if let Some(sb) = result.safe_browsing.as_ref().filter(|sb| !sb.threats.is_empty()) {
    out.push(ThreatSection {
      category: "safe_browsing".to_string(),
      title: "Google Safe Browsing".to_string(),
      severity: Severity::High,
      factors: sb
        .threats
        .iter()
        .map(|t| format!("Google Safe Browsing detected: {}", t.threat_type))
        .collect(),
      recommendations: sb.recommendations.clone(),
      education_topic: "google-safe-browsing".to_string(),
    });
  }

  out
}

fn category_title(name: &str) -> String {
  match name {
    crate::types::CATEGORY_PHISHING => "Phishing".to_string(),
    crate::types::CATEGORY_XSS => "Cross-Site Scripting (XSS)".to_string(),
    crate::types::CATEGORY_CSRF => "Cross-Site Request Forgery (CSRF)".to_string(),
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{CategoryFinding, SafeBrowsing, SafeBrowsingThreat};

  fn scored(score: f64) -> ScanResult {
    ScanResult {
      risk_score: score,
      ..ScanResult::default()
    }
  }

  #[test]
  fn boundary_table() {
    let s = Settings::default();
    let cases = [
      (29.0, RiskTier::Safe),
      (30.0, RiskTier::Warning),
      (69.0, RiskTier::Warning),
      (70.0, RiskTier::Danger),
    ];
    for (score, tier) in cases {
      assert_eq!(classify(&scored(score), &s).tier, tier, "score {score}");
    }
  }

  #[test]
  fn tiers_are_monotonic_over_score_range() {
    let s = Settings::default();
    let rank = |t: RiskTier| match t {
      RiskTier::Safe => 0,
      RiskTier::Warning => 1,
      RiskTier::Danger => 2,
    };
    let mut prev = 0;
    for score in 0..100 {
      let r = rank(classify(&scored(score as f64), &s).tier);
      assert!(r >= prev, "tier dropped at score {score}");
      prev = r;
    }
  }

  #[test]
  fn classify_is_deterministic() {
    let s = Settings::default();
    let r = scored(55.0);
    assert_eq!(classify(&r, &s), classify(&r, &s));
  }

  #[test]
  fn badge_table_per_tier() {
    let s = Settings::default();
    let danger = classify(&scored(85.0), &s);
    assert_eq!((danger.badge_color.as_str(), danger.badge_text.as_str()), ("#ff006e", "HIGH"));
    let warning = classify(&scored(45.0), &s);
    assert_eq!((warning.badge_color.as_str(), warning.badge_text.as_str()), ("#fb5607", "MED"));
    let safe = classify(&scored(5.0), &s);
    assert_eq!((safe.badge_color.as_str(), safe.badge_text.as_str()), ("#38b000", "OK"));
  }

  #[test]
  fn notify_and_overlay_follow_settings() {
    let mut s = Settings::default();
    let danger = classify(&scored(90.0), &s);
    assert!(danger.should_notify);
    assert!(danger.should_show_overlay);

    s.notify_on_high_risk = false;
    s.enable_education_mode = false;
    let quiet = classify(&scored(90.0), &s);
    assert!(!quiet.should_notify);
    assert!(!quiet.should_show_overlay);

    let warning = classify(&scored(60.0), &Settings::default());
    assert!(!warning.should_notify);
    assert!(!warning.should_show_overlay);
  }

  #[test]
  fn sections_respect_detection_toggles() {
    let mut result = scored(80.0);
    result.categories.insert(
      "xss".to_string(),
      CategoryFinding {
        present: true,
        severity: Severity::Medium,
        factors: vec!["inline handler".to_string()],
        recommendations: vec![],
      },
    );
    result.categories.insert(
      "phishing".to_string(),
      CategoryFinding {
        present: true,
        severity: Severity::High,
        factors: vec!["suspicious-domain".to_string()],
        recommendations: vec!["leave-site".to_string()],
      },
    );
    result.categories.insert("csrf".to_string(), CategoryFinding::default());
    result.safe_browsing = Some(SafeBrowsing {
      threats: vec![SafeBrowsingThreat {
        threat_type: "MALWARE".to_string(),
      }],
      recommendations: vec![],
    });

    let all = threat_sections(&result, &Settings::default());
    let names: Vec<_> = all.iter().map(|s| s.category.as_str()).collect();
    assert_eq!(names, vec!["phishing", "xss", "safe_browsing"]);
    assert_eq!(all[2].factors, vec!["Google Safe Browsing detected: MALWARE"]);

    let settings = Settings {
      enable_xss_detection: false,
      ..Settings::default()
    };
    let filtered = threat_sections(&result, &settings);
    assert!(filtered.iter().all(|s| s.category != "xss"));
  }
}
