//! Push notifications.
//!
//! Push payloads become visible notifications with a fixed title, icon,
//! badge and a single "open" action. A click closes the notification and
//! opens the configured destination in a new client window. Delivery is
//! best-effort: nothing is retried or persisted.

use crate::config::{LimitsConfig, NotificationConfig};
use crate::lifecycle::ClientRegistry;
use crate::models::{NavigationAction, Notification, NotificationAction};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Extract the text of a push payload.
///
/// Returns `None` when the payload is absent, not UTF-8, or blank.
pub fn payload_text(payload: Option<&[u8]>) -> Option<String> {
    let text = std::str::from_utf8(payload?).ok()?;
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Notifications on screen in the order they were shown.
#[derive(Default)]
struct Shown {
    by_id: HashMap<String, Notification>,
    order: VecDeque<String>,
}

/// Renders push payloads and routes clicks.
///
/// At most `capacity` notifications stay visible; showing one more closes
/// the oldest.
pub struct NotificationDispatcher {
    config: NotificationConfig,
    capacity: usize,
    visible: RwLock<Shown>,
}

impl NotificationDispatcher {
    pub fn new(config: NotificationConfig) -> Self {
        Self::with_capacity(config, LimitsConfig::MAX_VISIBLE_NOTIFICATIONS)
    }

    pub fn with_capacity(config: NotificationConfig, capacity: usize) -> Self {
        Self {
            config,
            capacity: capacity.max(1),
            visible: RwLock::new(Shown::default()),
        }
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Build the notification for a payload without showing it.
    pub fn render(&self, payload: Option<&[u8]>) -> Notification {
        let body = payload_text(payload).unwrap_or_else(|| {
            debug!("Push payload missing or unreadable, using fallback text");
            self.config.fallback_body.clone()
        });

        Notification {
            id: Uuid::new_v4().to_string(),
            title: self.config.title.clone(),
            body,
            icon: self.config.icon.clone(),
            badge: self.config.badge.clone(),
            actions: vec![NotificationAction {
                action: self.config.action.clone(),
                title: self.config.action_title.clone(),
            }],
            shown_at: Utc::now(),
        }
    }

    /// Handle an inbound push: render and show a notification.
    pub async fn on_push(&self, payload: Option<&[u8]>) -> Notification {
        let notification = self.render(payload);
        info!("Showing notification {}: {}", notification.id, notification.body);

        let mut visible = self.visible.write().await;
        while visible.by_id.len() >= self.capacity {
            let Some(oldest) = visible.order.pop_front() else {
                break;
            };
            debug!("Closing notification {} to make room", oldest);
            visible.by_id.remove(&oldest);
        }
        visible.order.push_back(notification.id.clone());
        visible
            .by_id
            .insert(notification.id.clone(), notification.clone());
        notification
    }

    /// Close a notification. Returns false if it was not visible.
    pub async fn close(&self, id: &str) -> bool {
        let mut visible = self.visible.write().await;
        visible.order.retain(|shown| shown != id);
        visible.by_id.remove(id).is_some()
    }

    /// Handle a click on a notification action.
    ///
    /// The action name is not inspected and repeated clicks are not
    /// deduplicated: every click closes (if still open) and navigates.
    pub async fn on_click(
        &self,
        id: &str,
        _action: Option<&str>,
        clients: &ClientRegistry,
    ) -> NavigationAction {
        if !self.close(id).await {
            debug!("Click on notification {} that is no longer visible", id);
        }

        let client = clients.open_window(&self.config.click_url).await;
        info!("Notification {} opened {}", id, self.config.click_url);

        NavigationAction::OpenWindow {
            client_id: client.id,
            url: self.config.click_url.clone(),
        }
    }

    /// Notifications currently on screen, oldest first.
    pub async fn visible(&self) -> Vec<Notification> {
        let visible = self.visible.read().await;
        visible
            .order
            .iter()
            .filter_map(|id| visible.by_id.get(id).cloned())
            .collect()
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(NotificationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationDefaults;

    #[test]
    fn test_payload_text() {
        assert_eq!(
            payload_text(Some(b"Open house Saturday".as_slice())),
            Some("Open house Saturday".to_string())
        );
        assert_eq!(payload_text(None), None);
        assert_eq!(payload_text(Some(b"   ".as_slice())), None);
        assert_eq!(payload_text(Some([0xffu8, 0xfe, 0x00].as_slice())), None);
    }

    #[tokio::test]
    async fn test_push_with_payload() {
        let dispatcher = NotificationDispatcher::default();

        let notification = dispatcher.on_push(Some(b"Price drop on Unit 204!".as_slice())).await;

        assert_eq!(notification.body, "Price drop on Unit 204!");
        assert_eq!(notification.title, NotificationDefaults::TITLE);
        assert_eq!(notification.icon, NotificationDefaults::ICON);
        assert_eq!(notification.badge, NotificationDefaults::BADGE);
        assert_eq!(notification.actions.len(), 1);
        assert_eq!(notification.actions[0].action, "open");
    }

    #[tokio::test]
    async fn test_push_without_payload_uses_fallback() {
        let dispatcher = NotificationDispatcher::default();

        let notification = dispatcher.on_push(None).await;

        assert_eq!(notification.body, "You have a new notification!");
        assert_eq!(dispatcher.visible().await.len(), 1);
    }

    #[tokio::test]
    async fn test_click_closes_and_navigates() {
        let dispatcher = NotificationDispatcher::default();
        let clients = ClientRegistry::new();
        let notification = dispatcher.on_push(Some(b"New listing".as_slice())).await;

        let action = dispatcher
            .on_click(&notification.id, Some("open"), &clients)
            .await;

        assert_eq!(action.url(), NotificationDefaults::CLICK_URL);
        assert!(dispatcher.visible().await.is_empty());
        assert_eq!(clients.len().await, 1);
    }

    #[tokio::test]
    async fn test_repeated_clicks_each_navigate() {
        let dispatcher = NotificationDispatcher::default();
        let clients = ClientRegistry::new();
        let notification = dispatcher.on_push(None).await;

        let first = dispatcher.on_click(&notification.id, None, &clients).await;
        let second = dispatcher.on_click(&notification.id, None, &clients).await;

        assert_eq!(first.url(), second.url());
        assert_eq!(clients.len().await, 2);
    }

    #[tokio::test]
    async fn test_oldest_notification_makes_room() {
        let dispatcher = NotificationDispatcher::with_capacity(NotificationConfig::default(), 2);

        let first = dispatcher.on_push(Some(b"Unit 101".as_slice())).await;
        dispatcher.on_push(Some(b"Unit 102".as_slice())).await;
        dispatcher.on_push(Some(b"Unit 103".as_slice())).await;

        let bodies: Vec<_> = dispatcher
            .visible()
            .await
            .into_iter()
            .map(|n| n.body)
            .collect();
        assert_eq!(bodies, vec!["Unit 102", "Unit 103"]);
        assert!(!dispatcher.close(&first.id).await);
    }

    #[tokio::test]
    async fn test_push_and_click_bookkeeping_stays_bounded() {
        let dispatcher = NotificationDispatcher::default();
        let clients = ClientRegistry::new();

        for _ in 0..1000 {
            let clicked = dispatcher.on_push(Some(b"Price drop".as_slice())).await;
            dispatcher.on_click(&clicked.id, Some("open"), &clients).await;
            dispatcher.on_push(None).await;
        }

        assert_eq!(
            dispatcher.visible().await.len(),
            LimitsConfig::MAX_VISIBLE_NOTIFICATIONS
        );
        assert_eq!(clients.len().await, LimitsConfig::MAX_CLIENTS);
    }
}
