//! Traffic classification.
//!
//! Classification is pure and total: every request maps to exactly one
//! [`TrafficClass`], and requests no rule matches fall back to `Api`.

use serde::{Deserialize, Serialize};

use crate::http::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficClass {
  /// Versioned assets and entry documents; served cache-first
  Static,
  /// Application data; served network-first
  Api,
  /// Personal data; never cached
  UserData,
  /// Telemetry beacons; queued for replay when delivery fails
  Analytics,
}

impl std::fmt::Display for TrafficClass {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Static => "static",
      Self::Api => "api",
      Self::UserData => "user_data",
      Self::Analytics => "analytics",
    };
    f.write_str(name)
  }
}

/// Rule tables used by the classifier. Substring matches are ASCII case-insensitive.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
  /// File extensions (without the dot) treated as static assets
  pub static_extensions: Vec<String>,
  /// Paths that are the application's entry document
  pub entry_documents: Vec<String>,
  /// Path segment that marks the API namespace
  pub api_segment: String,
  /// Path substrings that mark telemetry
  pub analytics_markers: Vec<String>,
  /// Host fragments of analytics vendors
  pub analytics_hosts: Vec<String>,
  /// Path substrings routed network-first even though they look like telemetry
  pub tracking_markers: Vec<String>,
  /// Path substrings that mark personal data
  pub user_data_markers: Vec<String>,
}

impl Default for ClassifierRules {
  fn default() -> Self {
    Self {
      static_extensions: [
        "css", "js", "mjs", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2",
        "ttf", "otf", "eot",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      entry_documents: vec!["/".to_string(), "/index.html".to_string()],
      api_segment: "/api/".to_string(),
      analytics_markers: vec!["analytics".to_string(), "gtag".to_string()],
      analytics_hosts: vec![
        "google-analytics.com".to_string(),
        "googletagmanager.com".to_string(),
        "analytics.google.com".to_string(),
      ],
      tracking_markers: vec!["tracking".to_string()],
      user_data_markers: vec![
        "user".to_string(),
        "profile".to_string(),
        "settings".to_string(),
      ],
    }
  }
}

impl ClassifierRules {
  /// Classify a request. First matching rule wins:
  ///
  /// 1. static extension or entry document
  /// 2. API namespace segment
  /// 3. analytics marker in the path or vendor host
  /// 4. tracking marker
  /// 5. user-data marker
  /// 6. otherwise `Api`
  pub fn classify(&self, request: &Request) -> TrafficClass {
    let path = request.url.path().to_ascii_lowercase();
    let host = request
      .url
      .host_str()
      .map(|h| h.to_ascii_lowercase())
      .unwrap_or_default();

    if self.is_static(&path) {
      return TrafficClass::Static;
    }
    if path.contains(&self.api_segment.to_ascii_lowercase()) {
      return TrafficClass::Api;
    }
    if contains_any(&path, &self.analytics_markers) || contains_any(&host, &self.analytics_hosts)
    {
      return TrafficClass::Analytics;
    }
    if contains_any(&path, &self.tracking_markers) {
      return TrafficClass::Api;
    }
    if contains_any(&path, &self.user_data_markers) {
      return TrafficClass::UserData;
    }
    TrafficClass::Api
  }

  fn is_static(&self, path: &str) -> bool {
    if self.entry_documents.iter().any(|doc| doc.eq_ignore_ascii_case(path)) {
      return true;
    }

    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
      Some((_, ext)) => self
        .static_extensions
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext)),
      None => false,
    }
  }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
  needles
    .iter()
    .filter(|n| !n.is_empty())
    .any(|n| haystack.contains(&n.to_ascii_lowercase()))
}
