//! Request and response descriptors exchanged at the interception point.

use serde::{Deserialize, Serialize};
use url::Url;

/// Header list in insertion order. Names may repeat.
pub type Headers = Vec<(String, String)>;

/// An outgoing request as seen by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Request {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// First value of a header, matched case-insensitively.
  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

/// Where a response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Served from the store without touching the network
  Cache,
  /// Served from the store after the network failed
  StaleCache,
  /// Synthesized 503, no recovery path
  Fallback,
  /// Synthesized 202, request parked in the retry queue
  Queued,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::StaleCache => "stale-cache",
      Self::Fallback => "fallback",
      Self::Queued => "queued",
    }
  }
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A response handed back through the interception point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  pub fn new(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
      source: ResponseSource::Network,
    }
  }

  /// 503 with a human-readable reason in the body.
  pub fn fallback(reason: &str) -> Self {
    Self {
      status: 503,
      headers: vec![(
        "content-type".to_string(),
        "text/plain; charset=utf-8".to_string(),
      )],
      body: format!("Service Unavailable: {}", reason).into_bytes(),
      source: ResponseSource::Fallback,
    }
  }

  /// 202 returned when a request was parked for later replay.
  pub fn queued() -> Self {
    Self {
      status: 202,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: br#"{"status":"queued"}"#.to_vec(),
      source: ResponseSource::Queued,
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// Status, headers and body match, regardless of source.
  pub fn same_content(&self, other: &Response) -> bool {
    self.status == other.status && self.headers == other.headers && self.body == other.body
  }
}

fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(n, _)| n.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_method_is_uppercased() {
    let req = Request::new("post", Url::parse("https://example.com/a").unwrap());
    assert_eq!(req.method, "POST");
    assert!(!req.is_get());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let req = Request::get(Url::parse("https://example.com/").unwrap())
      .with_header("Accept-Language", "en");
    assert_eq!(req.header("accept-language"), Some("en"));
    assert_eq!(req.header("accept"), None);
  }

  #[test]
  fn test_fallback_carries_reason() {
    let resp = Response::fallback("offline");
    assert_eq!(resp.status, 503);
    assert_eq!(resp.source, ResponseSource::Fallback);
    assert!(String::from_utf8_lossy(&resp.body).contains("offline"));
  }

  #[test]
  fn test_queued_is_accepted() {
    let resp = Response::queued();
    assert_eq!(resp.status, 202);
    assert!(resp.is_success());
    assert_eq!(resp.header("Content-Type"), Some("application/json"));
  }
}
