use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub const SETTINGS_KEY: &str = "settings";

/// User toggles, persisted in the synced storage area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
  pub enable_phishing_detection: bool,
  pub enable_xss_detection: bool,
  pub enable_csrf_detection: bool,
  pub enable_education_mode: bool,
  pub automatic_scan: bool,
  pub notify_on_high_risk: bool,
  pub api_endpoint: String,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      enable_phishing_detection: true,
      enable_xss_detection: true,
      enable_csrf_detection: true,
      enable_education_mode: true,
      automatic_scan: true,
      notify_on_high_risk: true,
      api_endpoint: default_api_endpoint(),
    }
  }
}

fn default_api_endpoint() -> String {
  "http://localhost:5000/api".to_string()
}

impl Settings {
  pub fn merged(&self, patch: &SettingsPatch) -> Settings {
    let mut out = self.clone();
    if let Some(v) = patch.enable_phishing_detection {
      out.enable_phishing_detection = v;
    }
    if let Some(v) = patch.enable_xss_detection {
      out.enable_xss_detection = v;
    }
    if let Some(v) = patch.enable_csrf_detection {
      out.enable_csrf_detection = v;
    }
    if let Some(v) = patch.enable_education_mode {
      out.enable_education_mode = v;
    }
    if let Some(v) = patch.automatic_scan {
      out.automatic_scan = v;
    }
    if let Some(v) = patch.notify_on_high_risk {
      out.notify_on_high_risk = v;
    }
    if let Some(v) = &patch.api_endpoint {
      out.api_endpoint = v.clone();
    }
    out
  }

  /// Whether findings for `category` should be shown to the user.
  pub fn detects(&self, category: &str) -> bool {
    match category {
      crate::types::CATEGORY_PHISHING => self.enable_phishing_detection,
      crate::types::CATEGORY_XSS => self.enable_xss_detection,
      crate::types::CATEGORY_CSRF => self.enable_csrf_detection,
      _ => true,
    }
  }
}

/// Partial settings. Also the shape persisted settings are read through, so
/// missing or unknown keys never drop a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enable_phishing_detection: Option<bool>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enable_xss_detection: Option<bool>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enable_csrf_detection: Option<bool>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enable_education_mode: Option<bool>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub automatic_scan: Option<bool>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notify_on_high_risk: Option<bool>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub api_endpoint: Option<String>,
}

pub struct SettingsStore {
  sync: Arc<dyn KeyValueStore>,
  state: Mutex<Option<Settings>>,
}

impl SettingsStore {
  pub fn new(sync: Arc<dyn KeyValueStore>) -> Self {
    Self {
      sync,
      state: Mutex::new(None),
    }
  }

  /// Reads persisted settings once; later calls return the in-memory copy.
  pub fn load(&self) -> Settings {
    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(current) = state.as_ref() {
      return current.clone();
    }
    let loaded = self.read_persisted();
    *state = Some(loaded.clone());
    loaded
  }

  pub fn current(&self) -> Settings {
    self.load()
  }

  /// Not transactional across contexts: two concurrent saves against the
  /// same sync area can lose an update.
  pub fn save(&self, patch: &SettingsPatch) -> Settings {
    let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
    let base = match state.as_ref() {
      Some(s) => s.clone(),
      None => self.read_persisted(),
    };
    let merged = base.merged(patch);

    match serde_json::to_value(&merged) {
      Ok(value) => {
        if let Err(e) = self.sync.set(SETTINGS_KEY, value) {
          tracing::warn!(error = %e, "failed to persist settings (keeping in-memory copy)");
        }
      }
      Err(e) => tracing::warn!(error = %e, "failed to encode settings"),
    }

    tracing::info!(
      automatic_scan = merged.automatic_scan,
      notify_on_high_risk = merged.notify_on_high_risk,
      education_mode = merged.enable_education_mode,
      "settings saved"
    );
    *state = Some(merged.clone());
    merged
  }

  fn read_persisted(&self) -> Settings {
    let defaults = Settings::default();
    match self.sync.get(SETTINGS_KEY) {
      Ok(Some(raw)) => match serde_json::from_value::<SettingsPatch>(raw) {
        Ok(patch) => defaults.merged(&patch),
        Err(e) => {
          tracing::warn!(error = %e, "persisted settings unreadable; using defaults");
          defaults
        }
      },
      Ok(None) => {
        match serde_json::to_value(&defaults) {
          Ok(value) => {
            if let Err(e) = self.sync.set(SETTINGS_KEY, value) {
              tracing::warn!(error = %e, "failed to persist default settings");
            }
          }
          Err(e) => tracing::warn!(error = %e, "failed to encode default settings"),
        }
        defaults
      }
      Err(e) => {
        tracing::warn!(error = %e, "settings storage unavailable; using defaults");
        defaults
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStore;
  use serde_json::json;

  #[test]
  fn first_load_persists_defaults_exactly_once() {
    let sync = Arc::new(MemoryStore::new());
    let store = SettingsStore::new(sync.clone());

    assert_eq!(store.load(), Settings::default());
    assert_eq!(store.load(), Settings::default());
    assert_eq!(sync.write_count(), 1);
    assert_eq!(
      sync.get(SETTINGS_KEY).unwrap(),
      Some(serde_json::to_value(Settings::default()).unwrap())
    );
  }

  #[test]
  fn persisted_values_win_key_by_key() {
    let sync = Arc::new(MemoryStore::new());
    sync
      .set(
        SETTINGS_KEY,
        json!({"automaticScan": false, "apiEndpoint": "https://scan.example/api", "legacy": 1}),
      )
      .unwrap();

    let settings = SettingsStore::new(sync.clone()).load();
    assert!(!settings.automatic_scan);
    assert_eq!(settings.api_endpoint, "https://scan.example/api");
    assert!(settings.notify_on_high_risk);
    assert!(settings.enable_xss_detection);
    assert_eq!(sync.write_count(), 1);
  }

  #[test]
  fn save_merges_shallow_and_persists() {
    let sync = Arc::new(MemoryStore::new());
    let store = SettingsStore::new(sync.clone());
    store.load();

    let merged = store.save(&SettingsPatch {
      notify_on_high_risk: Some(false),
      api_endpoint: Some("not a url".to_string()),
      ..SettingsPatch::default()
    });

    assert!(!merged.notify_on_high_risk);
    assert_eq!(merged.api_endpoint, "not a url");
    assert!(merged.automatic_scan);
    assert_eq!(store.current(), merged);

    let persisted: Settings = serde_json::from_value(sync.get(SETTINGS_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(persisted, merged);
  }

  #[test]
  fn patch_deserializes_from_camel_case() {
    let patch: SettingsPatch =
      serde_json::from_value(json!({"enableEducationMode": false})).unwrap();
    assert_eq!(patch.enable_education_mode, Some(false));
    assert_eq!(patch.automatic_scan, None);
  }
}
