//! Notification feed derived from server alerts, with locally owned read state.

pub mod actions;
pub mod center;
pub mod mapper;
pub mod read_state;

pub use actions::ActionCoordinator;
pub use center::{NotificationCenter, NotificationConfig};
pub use read_state::{JsonFileBackend, MemoryBackend, ReadIdSet, ReadStateBackend};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Alert,
    Signal,
    System,
}

/// Where the UI should navigate when a notification is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationLink {
    pub page: String,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Stable across fetches; derived from the source record.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<NotificationLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<NotificationMetadata>,
}

impl Notification {
    /// Server alert backing this notification, if any.
    pub fn alert_id(&self) -> Option<i64> {
        self.metadata.as_ref().and_then(|m| m.alert_id)
    }
}

/// Everything the UI renders for the notification feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsSnapshot {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl NotificationsSnapshot {
    pub(crate) fn recount(&mut self) {
        self.unread_count = self.notifications.iter().filter(|n| !n.read).count();
    }
}
