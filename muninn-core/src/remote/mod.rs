use crate::config::RemoteConfig;
use crate::error::ScanError;
use crate::types::{url_label_for_log, ScanResult};
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Url;
use std::io::Read;
use std::time::Duration;

pub mod retry;
pub mod schema;

pub use retry::RetryPolicy;

/// Client side of the remote scan service.
pub trait ScanTransport: Send + Sync {
  /// `POST {endpoint}/scan` with `{url, html}`.
  fn scan(&self, endpoint: &str, url: &str, html: &str) -> Result<ScanResult, ScanError>;

  /// `GET {endpoint}/educate/{topic}`; the payload is opaque to the pipeline.
  fn educate(&self, endpoint: &str, topic: &str) -> Result<serde_json::Value, ScanError>;
}

pub struct HttpTransport {
  client: Client,
  max_response_bytes: usize,
}

impl HttpTransport {
  pub fn new(cfg: &RemoteConfig) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_seconds))
      .build()
      .map_err(|e| anyhow::anyhow!("build HTTP client: {e}"))?;
    Ok(Self {
      client,
      max_response_bytes: cfg.max_response_bytes,
    })
  }

  fn read_success_body(&self, response: Response, url: &Url) -> Result<Vec<u8>, ScanError> {
    let status = response.status();
    if !status.is_success() {
      return Err(ScanError::status(
        status.as_u16(),
        format!(
          "server responded with {} for {}",
          status.as_u16(),
          safe_url_label(url)
        ),
      ));
    }
    read_response_with_limit(response, self.max_response_bytes)
  }
}

impl ScanTransport for HttpTransport {
  fn scan(&self, endpoint: &str, url: &str, html: &str) -> Result<ScanResult, ScanError> {
    let target = endpoint_url(endpoint, &["scan"])?;
    let body = serde_json::to_vec(&schema::ScanRequestBody { url, html })
      .map_err(|e| ScanError::InvalidInput(format!("encode scan request: {e}")))?;

    tracing::debug!(
      service = %safe_url_label(&target),
      page = %url_label_for_log(url),
      html_bytes = html.len(),
      "sending scan request"
    );

    let response = self
      .client
      .post(target.clone())
      .header(CONTENT_TYPE, "application/json")
      .header(USER_AGENT, user_agent())
      .body(body)
      .send()
      .map_err(|e| ScanError::transport(format!("POST {}: {e}", safe_url_label(&target))))?;

    let bytes = self.read_success_body(response, &target)?;
    schema::decode_scan_response(&bytes)
  }

  fn educate(&self, endpoint: &str, topic: &str) -> Result<serde_json::Value, ScanError> {
    validate_topic(topic)?;
    let target = endpoint_url(endpoint, &["educate", topic])?;

    let response = self
      .client
      .get(target.clone())
      .header(USER_AGENT, user_agent())
      .send()
      .map_err(|e| ScanError::transport(format!("GET {}: {e}", safe_url_label(&target))))?;

    let bytes = self.read_success_body(response, &target)?;
    serde_json::from_slice(&bytes)
      .map_err(|e| ScanError::status(200, format!("malformed education payload: {e}")))
  }
}

/// Education topics end up in a URL path; only slugs are accepted.
pub fn validate_topic(topic: &str) -> Result<(), ScanError> {
  let ok = !topic.is_empty()
    && topic
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
  if ok {
    Ok(())
  } else {
    Err(ScanError::InvalidInput(format!(
      "invalid education topic: {topic:?}"
    )))
  }
}

/// Appends path segments to the configured endpoint. The endpoint is user
/// supplied and unvalidated, so a bad value surfaces here as a network error.
pub fn endpoint_url(endpoint: &str, segments: &[&str]) -> Result<Url, ScanError> {
  let mut url = Url::parse(endpoint.trim())
    .map_err(|e| ScanError::endpoint(format!("invalid API endpoint {endpoint:?}: {e}")))?;
  {
    let mut path = url
      .path_segments_mut()
      .map_err(|_| ScanError::endpoint(format!("API endpoint cannot be a base: {endpoint:?}")))?;
    path.pop_if_empty();
    path.extend(segments);
  }
  Ok(url)
}

fn user_agent() -> String {
  format!("Muninn/{}", env!("CARGO_PKG_VERSION"))
}

fn read_response_with_limit(response: Response, max_bytes: usize) -> Result<Vec<u8>, ScanError> {
  let mut out = Vec::new();
  let mut limited = response.take((max_bytes.saturating_add(1)) as u64);
  limited
    .read_to_end(&mut out)
    .map_err(|e| ScanError::transport(format!("read response body: {e}")))?;

  if out.len() > max_bytes {
    return Err(ScanError::status(
      200,
      format!("response exceeds max size {max_bytes} bytes"),
    ));
  }

  Ok(out)
}

fn safe_url_label(url: &Url) -> String {
  let host = url.host_str().unwrap_or("<no-host>");
  let mut path = url.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}
