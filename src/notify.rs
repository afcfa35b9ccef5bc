//! Push and notification-click hooks.

use crate::config::NotificationConfig;

/// A user-visible notification built from a push payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
}

/// What a notification click asks the host to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
  OpenWindow(String),
  Dismiss,
}

/// Turn a push payload into a notification. The payload text becomes the
/// body; title and icons are fixed.
pub fn on_push(payload: Option<&str>, config: &NotificationConfig) -> Notification {
  let body = payload
    .map(str::trim)
    .filter(|text| !text.is_empty())
    .unwrap_or(config.default_body.as_str());

  Notification {
    title: config.title.clone(),
    body: body.to_string(),
    icon: config.icon.clone(),
    badge: config.badge.clone(),
  }
}

/// Resolve a notification click. `close` dismisses, anything else opens
/// the app.
pub fn on_click(action: Option<&str>, config: &NotificationConfig) -> ClientAction {
  match action {
    Some("close") => ClientAction::Dismiss,
    _ => ClientAction::OpenWindow(config.open_url.clone()),
  }
}
