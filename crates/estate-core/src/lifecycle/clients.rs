//! Pages the coordinator controls.

use crate::config::LimitsConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// One open page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub url: String,
    /// Generation of the instance controlling this page, if any.
    pub controller: Option<String>,
}

/// Tracked pages in the order they were opened.
#[derive(Debug, Default)]
struct ClientTable {
    by_id: HashMap<String, Client>,
    order: VecDeque<String>,
}

/// Registry of open pages.
///
/// A claim hands every known page to one generation without a reload.
/// Windows opened afterwards start out controlled by the claimed generation.
/// At most `capacity` pages are tracked; the longest-open page is forgotten
/// to make room for a new one.
#[derive(Debug)]
pub struct ClientRegistry {
    capacity: usize,
    clients: RwLock<ClientTable>,
    controller: RwLock<Option<String>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::with_capacity(LimitsConfig::MAX_CLIENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clients: RwLock::new(ClientTable::default()),
            controller: RwLock::new(None),
        }
    }

    /// Track a page. It is controlled by the current controller, if any.
    pub async fn register(&self, url: impl Into<String>) -> Client {
        let controller = self.controller.read().await.clone();
        let client = Client {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            controller,
        };

        let mut clients = self.clients.write().await;
        while clients.by_id.len() >= self.capacity {
            let Some(oldest) = clients.order.pop_front() else {
                break;
            };
            debug!("Forgetting page {} to stay within {} pages", oldest, self.capacity);
            clients.by_id.remove(&oldest);
        }
        clients.order.push_back(client.id.clone());
        clients.by_id.insert(client.id.clone(), client.clone());
        client
    }

    /// Open a new window on `url`.
    pub async fn open_window(&self, url: &str) -> Client {
        let client = self.register(url).await;
        debug!("Opened window {} on {}", client.id, client.url);
        client
    }

    pub async fn remove(&self, id: &str) -> Option<Client> {
        let mut clients = self.clients.write().await;
        clients.order.retain(|tracked| tracked != id);
        clients.by_id.remove(id)
    }

    /// Make `generation` the controller of every known page.
    ///
    /// Returns the number of pages whose controller changed.
    pub async fn claim(&self, generation: &str) -> usize {
        *self.controller.write().await = Some(generation.to_string());

        let mut clients = self.clients.write().await;
        let mut changed = 0;
        for client in clients.by_id.values_mut() {
            if client.controller.as_deref() != Some(generation) {
                client.controller = Some(generation.to_string());
                changed += 1;
            }
        }
        changed
    }

    /// Generation that last claimed the pages.
    pub async fn controller(&self) -> Option<String> {
        self.controller.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.by_id.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Client> {
        self.clients.read().await.by_id.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.by_id.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_takes_over_existing_pages() {
        let clients = ClientRegistry::new();
        let first = clients.register("/").await;
        assert_eq!(first.controller, None);

        assert_eq!(clients.claim("v1").await, 1);
        assert_eq!(clients.get(&first.id).await.unwrap().controller.as_deref(), Some("v1"));

        // Already controlled pages are not counted again
        assert_eq!(clients.claim("v1").await, 0);
        assert_eq!(clients.claim("v2").await, 1);
    }

    #[tokio::test]
    async fn test_new_window_inherits_controller() {
        let clients = ClientRegistry::new();
        clients.claim("v3").await;

        let window = clients.open_window("/listings").await;

        assert_eq!(window.controller.as_deref(), Some("v3"));
        assert_eq!(clients.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let clients = ClientRegistry::new();
        let client = clients.register("/").await;
        assert!(clients.remove(&client.id).await.is_some());
        assert!(clients.is_empty().await);
    }

    #[tokio::test]
    async fn test_capacity_forgets_oldest_page() {
        let clients = ClientRegistry::with_capacity(2);
        let first = clients.register("/").await;
        let second = clients.open_window("/listings").await;
        let third = clients.open_window("/listings/204").await;

        assert_eq!(clients.len().await, 2);
        assert!(clients.get(&first.id).await.is_none());
        assert!(clients.get(&second.id).await.is_some());
        assert!(clients.get(&third.id).await.is_some());
    }

    #[tokio::test]
    async fn test_many_windows_stay_bounded() {
        let clients = ClientRegistry::new();
        for _ in 0..1000 {
            clients.open_window("/").await;
        }
        assert_eq!(clients.len().await, LimitsConfig::MAX_CLIENTS);
    }
}
