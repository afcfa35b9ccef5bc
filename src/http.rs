//! Request and response values passed between the interceptor, the network
//! and the cache store.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use url::Url;

/// Error field carried by the synthetic offline response.
pub const OFFLINE_ERROR: &str = "Offline";

/// Message carried by the synthetic offline response.
pub const OFFLINE_MESSAGE: &str = "No internet connection and no cached data available";

/// An outgoing request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  /// Build a GET request from a URL string.
  pub fn get(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
    Ok(Self::new(Method::GET, url))
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Whether the request uses a scheme the interceptor understands.
  pub fn is_http(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }
}

/// A fully buffered response.
///
/// Bodies are always read to completion before a response is handed to the
/// cache, so a stored entry is never partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// The 503 answer for an API request made offline with nothing cached.
  pub fn offline() -> Self {
    let body = serde_json::json!({
      "error": OFFLINE_ERROR,
      "message": OFFLINE_MESSAGE,
    });

    Self::new(503, body.to_string()).with_header("Content-Type", "application/json")
  }

  /// 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header value matching `name`, case-insensitive.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn json(&self) -> Result<Value> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Response body is not JSON: {}", e))
  }

  /// Whether this is the synthetic offline response rather than a genuine
  /// backend 503. UI code checks the JSON `error` field, not the status.
  pub fn is_offline_fallback(&self) -> bool {
    self.status == 503
      && self
        .json()
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(|e| e == OFFLINE_ERROR))
        .unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn offline_response_shape() {
    let response = Response::offline();
    assert_eq!(response.status, 503);
    assert_eq!(response.header("content-type"), Some("application/json"));

    let body = response.json().unwrap();
    assert_eq!(body["error"], "Offline");
    assert_eq!(body["message"], OFFLINE_MESSAGE);
    assert!(response.is_offline_fallback());
  }

  #[test]
  fn backend_503_is_not_offline_fallback() {
    let response = Response::new(503, r#"{"error":"Maintenance"}"#);
    assert!(!response.is_offline_fallback());

    let plain = Response::new(503, "Service Unavailable");
    assert!(!plain.is_offline_fallback());
  }

  #[test]
  fn success_range() {
    assert!(Response::new(200, "").is_success());
    assert!(Response::new(204, "").is_success());
    assert!(!Response::new(304, "").is_success());
    assert!(!Response::new(404, "").is_success());
  }

  #[test]
  fn scheme_check() {
    assert!(Request::get("https://example.com/").unwrap().is_http());
    assert!(!Request::get("chrome-extension://abc/script.js").unwrap().is_http());
  }
}
