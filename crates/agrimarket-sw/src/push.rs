//! Push payloads and notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::clients::ClientMatchOptions;
use crate::scope::WorkerScope;
use crate::Result;

pub const DEFAULT_TITLE: &str = "AgriMarket";
pub const DEFAULT_BODY: &str = "You have a new update.";
pub const DEFAULT_URL: &str = "/";
pub const DEFAULT_TAG: &str = "agrimarket-notification";
const ICON: &str = "/favicon.ico";

/// Data sent with a push message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    pub tag: Option<String>,
}

impl PushPayload {
    /// Parse raw push data field by field. Anything that is not a JSON
    /// object, and any field that is not a non-empty string, counts as
    /// absent.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(Value::Object(fields)) = data.and_then(|d| serde_json::from_slice(d).ok()) else {
            return Self::default();
        };
        let field = |name: &str| {
            fields
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            title: field("title"),
            body: field("body"),
            url: field("url"),
            tag: field("tag"),
        }
    }

    /// The notification to show for this payload.
    pub fn into_notification(self) -> Notification {
        Notification {
            title: self.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: self.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
            icon: ICON.to_string(),
            badge: ICON.to_string(),
            tag: self.tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
            url: self.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
        }
    }
}

/// A displayed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    /// Page opened or focused when the notification is clicked.
    pub url: String,
}

/// Notifications currently on screen.
#[derive(Debug, Default)]
pub struct NotificationTray {
    shown: Vec<Notification>,
}

impl NotificationTray {
    /// Show a notification, replacing any with the same tag.
    pub fn show(&mut self, notification: Notification) {
        self.shown.retain(|n| n.tag != notification.tag);
        self.shown.push(notification);
    }

    /// Close and return the notification with `tag`.
    pub fn close(&mut self, tag: &str) -> Option<Notification> {
        let index = self.shown.iter().position(|n| n.tag == tag)?;
        Some(self.shown.remove(index))
    }

    pub fn get(&self, tag: &str) -> Option<&Notification> {
        self.shown.iter().find(|n| n.tag == tag)
    }

    pub fn list(&self) -> &[Notification] {
        &self.shown
    }
}

/// Show the notification for a push message.
pub async fn show_push(scope: &WorkerScope, data: Option<&[u8]>) {
    let notification = PushPayload::parse(data).into_notification();
    info!(tag = %notification.tag, "Push received");
    scope.show_notification(notification).await;
}

/// Close the clicked notification, then focus a window already showing its
/// target or open a new one.
pub async fn open_notification_target(scope: &WorkerScope, notification: &Notification) -> Result<()> {
    scope.close_notification(&notification.tag).await;

    let target = scope.resolve(&notification.url)?;
    let windows = scope.match_clients(&ClientMatchOptions::all_windows()).await;

    if let Some(existing) = windows.iter().find(|c| c.url == target) {
        debug!(client = %existing.id, url = %target, "Focusing existing window");
        scope.focus_client(&existing.id).await?;
    } else {
        debug!(url = %target, "Opening new window");
        scope.open_window(target).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_payload() {
        let data = br#"{"title":"Order shipped","body":"Your maize is on the way","url":"/orders/42","tag":"order-42"}"#;
        let payload = PushPayload::parse(Some(data.as_slice()));

        assert_eq!(payload.title.as_deref(), Some("Order shipped"));
        assert_eq!(payload.url.as_deref(), Some("/orders/42"));
        assert_eq!(payload.tag.as_deref(), Some("order-42"));
    }

    #[test]
    fn test_partial_payload_defaults_missing_fields() {
        let notification = PushPayload::parse(Some(br#"{"title":"Harvest ready","tag":7}"#.as_slice())).into_notification();

        assert_eq!(notification.title, "Harvest ready");
        assert_eq!(notification.body, DEFAULT_BODY);
        assert_eq!(notification.url, DEFAULT_URL);
        assert_eq!(notification.tag, DEFAULT_TAG);
    }

    #[test]
    fn test_malformed_payload_uses_defaults() {
        for data in [None, Some(&b"not json"[..]), Some(&b"[1,2]"[..]), Some(&b""[..])] {
            let notification = PushPayload::parse(data).into_notification();
            assert_eq!(notification.title, DEFAULT_TITLE);
            assert_eq!(notification.url, DEFAULT_URL);
        }
    }

    #[test]
    fn test_tray_replaces_same_tag() {
        let mut tray = NotificationTray::default();
        tray.show(PushPayload::default().into_notification());
        tray.show(
            PushPayload {
                title: Some("Second".to_string()),
                ..Default::default()
            }
            .into_notification(),
        );

        assert_eq!(tray.list().len(), 1);
        assert_eq!(tray.get(DEFAULT_TAG).map(|n| n.title.as_str()), Some("Second"));
        assert!(tray.close(DEFAULT_TAG).is_some());
        assert!(tray.list().is_empty());
    }
}
