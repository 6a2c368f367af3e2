//! Canonical request identity used to address cached responses.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::http::Request;

/// Request identity: method, normalized URL, and the selected header subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
  /// Lowercased name and trimmed value for each selected header present on the request
  pub headers: Vec<(String, String)>,
}

impl RequestKey {
  /// Build a key from a request, keeping only the headers named in `vary`.
  ///
  /// Headers missing from the request are left out of the key, so a request
  /// without `Accept-Language` matches an entry stored without one.
  pub fn from_request(request: &Request, vary: &[String]) -> Self {
    let headers = vary
      .iter()
      .filter_map(|name| {
        request
          .header(name)
          .map(|value| (name.to_ascii_lowercase(), value.trim().to_string()))
      })
      .collect();

    Self {
      method: request.method.to_ascii_uppercase(),
      url: normalize_url(&request.url),
      headers,
    }
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.description().as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable canonical form, e.g. `GET https://example.com/app.js`.
  pub fn description(&self) -> String {
    let mut out = format!("{} {}", self.method, self.url);
    for (name, value) in &self.headers {
      out.push('\n');
      out.push_str(name);
      out.push(':');
      out.push_str(value);
    }
    out
  }
}

/// Drop the fragment; the url crate already lowercases scheme and host and
/// strips default ports.
fn normalize_url(url: &url::Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}
