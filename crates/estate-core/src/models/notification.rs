//! Rendered notifications and the navigation a click produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One action button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub actions: Vec<NotificationAction>,
    pub shown_at: DateTime<Utc>,
}

/// What a notification click asks the environment to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavigationAction {
    OpenWindow { client_id: String, url: String },
}

impl NavigationAction {
    pub fn url(&self) -> &str {
        match self {
            NavigationAction::OpenWindow { url, .. } => url,
        }
    }
}
