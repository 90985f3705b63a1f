//! Push payloads and notification clicks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const NOTIFICATION_ICON: &str = "/icons/icon-192x192.png";
pub const NOTIFICATION_BADGE: &str = "/icons/badge-72x72.png";
pub const DEFAULT_TAG: &str = "offgrid-notification";

/// Tag of the background sync that flushes offline check-ins.
pub const SYNC_CHECKINS: &str = "sync-checkins";

#[derive(Debug, Deserialize)]
struct PushPayload {
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// A notification the host should display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Notification {
    /// Build a notification from a push payload.
    ///
    /// Returns `None` for a missing payload or one without a `title`.
    pub fn from_push(payload: Option<Value>) -> Option<Self> {
        let payload: PushPayload = serde_json::from_value(payload?).ok()?;
        Some(Self {
            title: payload.title,
            body: payload.body,
            icon: NOTIFICATION_ICON.into(),
            badge: NOTIFICATION_BADGE.into(),
            tag: payload.tag.filter(|t| !t.is_empty()).unwrap_or_else(|| DEFAULT_TAG.into()),
            data: payload.data,
        })
    }
}

/// The page a click on a notification with `data` should lead to.
pub fn click_target(data: Option<&Value>) -> &str {
    data.and_then(|d| d.get("url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .unwrap_or("/")
}
