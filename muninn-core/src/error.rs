use thiserror::Error;

/// Failures a scan caller can observe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("network error: {message}")]
  Network {
    status: Option<u16>,
    message: String,
    retryable: bool,
  },

  #[error("scan already in progress for {0}")]
  ScanInProgress(String),
}

impl ScanError {
  /// Connection, timeout or body-read failure.
  pub fn transport(message: impl Into<String>) -> Self {
    ScanError::Network {
      status: None,
      message: message.into(),
      retryable: true,
    }
  }

  /// Unusable API endpoint; another attempt cannot help.
  pub fn endpoint(message: impl Into<String>) -> Self {
    ScanError::Network {
      status: None,
      message: message.into(),
      retryable: false,
    }
  }

  /// 5xx and 429 are worth another attempt, anything else is final.
  pub fn status(status: u16, message: impl Into<String>) -> Self {
    ScanError::Network {
      status: Some(status),
      message: message.into(),
      retryable: status >= 500 || status == 429,
    }
  }

  pub fn is_retryable(&self) -> bool {
    matches!(self, ScanError::Network { retryable: true, .. })
  }
}

/// Host persistence failure. Logged by callers, never surfaced to the user.
#[derive(Debug, Clone, Error)]
#[error("storage {op} failed for key `{key}`: {message}")]
pub struct StorageError {
  pub op: &'static str,
  pub key: String,
  pub message: String,
}

impl StorageError {
  pub fn new(op: &'static str, key: &str, err: impl std::fmt::Display) -> Self {
    Self {
      op,
      key: key.to_string(),
      message: err.to_string(),
    }
  }
}
