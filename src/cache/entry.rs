//! Captured response snapshots and generation metadata.

use chrono::{DateTime, Utc};

use super::key::RequestKey;
use crate::http::{Headers, Response, ResponseSource};

/// A response captured for one request key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: RequestKey,
  pub status: u16,
  /// Header order is preserved as received
  pub headers: Headers,
  /// Opaque body bytes, possibly empty
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Snapshot a response under `key`, stamped with the current time.
  pub fn capture(key: RequestKey, response: &Response) -> Self {
    Self {
      key,
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      stored_at: Utc::now(),
    }
  }

  pub fn into_response(self, source: ResponseSource) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
      source,
    }
  }
}

/// Summary of one store generation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GenerationInfo {
  pub name: String,
  pub created_at: DateTime<Utc>,
  pub current: bool,
  pub entry_count: usize,
}
