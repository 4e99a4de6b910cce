//! Control channel: commands from the client application and platform events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::config::NotificationConfig;
use crate::error::SwResult;

/// A command posted by the client application.
///
/// Wire format: `{"type": "SKIP_WAITING"}` or `{"type": "CLEAR_CACHE"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Promote the waiting version to active now.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    /// Delete every cache, current ones included.
    #[serde(rename = "CLEAR_CACHE")]
    ClearCache,
}

impl ControlMessage {
    /// Decode a message. Unknown types and malformed payloads yield `None`.
    pub fn parse(value: &JsonValue) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    /// Decode a raw JSON message.
    pub fn parse_str(raw: &str) -> Option<Self> {
        serde_json::from_str::<JsonValue>(raw)
            .ok()
            .and_then(|value| Self::parse(&value))
    }
}

// ==================== Notifications ====================

/// Extra data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// When the push arrived (ms since epoch).
    pub date_of_arrival: u64,
    pub primary_key: u64,
}

/// A notification to show for an incoming push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

impl Notification {
    /// Render a push. An absent or blank payload gets the configured default body.
    pub fn render(config: &NotificationConfig, payload: Option<&str>) -> Self {
        let body = payload
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(&config.body)
            .to_string();

        Self {
            title: config.title.clone(),
            body,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: offkit_common::unix_millis(),
                primary_key: 1,
            },
        }
    }
}

// ==================== Background Sync ====================

/// Hook for replaying deferred work once connectivity returns.
#[async_trait]
pub trait BackgroundSync: Send + Sync {
    async fn sync(&self, tag: &str) -> SwResult<()>;
}

/// Default hook: nothing is queued, so there is nothing to replay.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSync;

#[async_trait]
impl BackgroundSync for NoopSync {
    async fn sync(&self, tag: &str) -> SwResult<()> {
        debug!(tag, "Background sync requested; nothing queued");
        Ok(())
    }
}
