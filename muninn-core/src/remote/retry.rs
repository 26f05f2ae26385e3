use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry with exponential backoff for remote scan calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
  /// Total attempts including the first one.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,

  #[serde(default = "default_initial_backoff_ms")]
  pub initial_backoff_ms: u64,

  #[serde(default = "default_max_backoff_ms")]
  pub max_backoff_ms: u64,

  #[serde(default = "default_multiplier")]
  pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
  3
}

fn default_initial_backoff_ms() -> u64 {
  500
}

fn default_max_backoff_ms() -> u64 {
  8_000
}

fn default_multiplier() -> f64 {
  2.0
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      initial_backoff_ms: default_initial_backoff_ms(),
      max_backoff_ms: default_max_backoff_ms(),
      multiplier: default_multiplier(),
    }
  }
}

impl RetryPolicy {
  /// Single attempt, no backoff.
  pub fn none() -> Self {
    Self {
      max_attempts: 1,
      initial_backoff_ms: 0,
      max_backoff_ms: 0,
      multiplier: 1.0,
    }
  }

  pub fn validate(&self) -> Option<String> {
    if self.max_attempts == 0 {
      return Some("max_attempts must be >= 1".to_string());
    }
    if !self.multiplier.is_finite() || self.multiplier < 1.0 {
      return Some("multiplier must be a finite number >= 1.0".to_string());
    }
    if self.max_backoff_ms < self.initial_backoff_ms {
      return Some("max_backoff_ms must be >= initial_backoff_ms".to_string());
    }
    None
  }

  /// Delay before retry number `retry` (0-based: 0 is the wait before the
  /// second attempt).
  pub fn backoff_for(&self, retry: u32) -> Duration {
    let exp = i32::try_from(retry).unwrap_or(i32::MAX);
    let raw = self.initial_backoff_ms as f64 * self.multiplier.powi(exp);
    let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
  }

  /// Runs `op` until it succeeds, returns a non-retryable error, or the
  /// attempt budget is spent. `op` receives the 1-based attempt number.
  pub fn run<T>(
    &self,
    label: &str,
    mut op: impl FnMut(u32) -> Result<T, ScanError>,
  ) -> Result<T, ScanError> {
    let attempts = self.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      match op(attempt) {
        Ok(v) => return Ok(v),
        Err(e) if e.is_retryable() && attempt < attempts => {
          let delay = self.backoff_for(attempt - 1);
          tracing::warn!(
            target_label = %label,
            attempt,
            max_attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "remote call failed; retrying"
          );
          if !delay.is_zero() {
            std::thread::sleep(delay);
          }
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}
