//! Notification descriptors produced from push signals.

use chrono::Utc;
use serde::Serialize;
use url::Url;

use crate::config::NotificationConfig;

pub const ACTION_OPEN: &str = "open";
pub const ACTION_DISMISS: &str = "dismiss";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Free-form metadata handed back on click
  pub data: serde_json::Value,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

impl Notification {
  /// Build the notification for a push signal. Blank payloads use the configured default body.
  pub fn from_push(payload: Option<&str>, config: &NotificationConfig) -> Self {
    let body = payload
      .map(str::trim)
      .filter(|text| !text.is_empty())
      .unwrap_or(config.default_body.as_str())
      .to_string();

    Self {
      title: config.title.clone(),
      body,
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: config.vibrate.clone(),
      data: serde_json::json!({
        "arrived_at": Utc::now().to_rfc3339(),
        "url": config.open_url,
      }),
      actions: vec![
        NotificationAction {
          action: ACTION_OPEN.to_string(),
          title: "Open".to_string(),
        },
        NotificationAction {
          action: ACTION_DISMISS.to_string(),
          title: "Dismiss".to_string(),
        },
      ],
    }
  }
}

/// What the host should do after the user clicks a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  OpenWindow(Url),
  Dismissed,
}

/// Resolve a click. Clicking the body (no action) behaves like `open`.
pub fn resolve_click(action: Option<&str>, origin: &Url, open_url: &str) -> ClickOutcome {
  if action == Some(ACTION_DISMISS) {
    return ClickOutcome::Dismissed;
  }
  match origin.join(open_url) {
    Ok(url) => ClickOutcome::OpenWindow(url),
    Err(_) => ClickOutcome::OpenWindow(origin.clone()),
  }
}
