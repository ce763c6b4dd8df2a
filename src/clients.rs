//! Open client contexts (pages) and which cache generation controls them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use url::Url;

/// Identifier of an open client context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "client-{}", self.0)
  }
}

/// A page served under the agent's scope.
#[derive(Debug, Clone)]
pub struct Client {
  pub id: ClientId,
  pub url: Url,
  /// Generation currently serving this client, None while uncontrolled
  pub controller: Option<String>,
}

/// Registry of open clients.
#[derive(Debug, Default)]
pub struct Clients {
  next_id: AtomicU64,
  clients: RwLock<BTreeMap<ClientId, Client>>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a newly opened page. It starts uncontrolled.
  pub async fn open(&self, url: Url) -> ClientId {
    let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
    self.clients.write().await.insert(
      id,
      Client {
        id,
        url,
        controller: None,
      },
    );
    id
  }

  pub async fn close(&self, id: ClientId) -> Option<Client> {
    self.clients.write().await.remove(&id)
  }

  pub async fn get(&self, id: ClientId) -> Option<Client> {
    self.clients.read().await.get(&id).cloned()
  }

  pub async fn match_all(&self) -> Vec<Client> {
    self.clients.read().await.values().cloned().collect()
  }

  /// Put every open client under `generation`. Returns how many changed controller.
  pub async fn claim(&self, generation: &str) -> usize {
    let mut clients = self.clients.write().await;
    let mut changed = 0;
    for client in clients.values_mut() {
      if client.controller.as_deref() != Some(generation) {
        client.controller = Some(generation.to_string());
        changed += 1;
      }
    }
    changed
  }

  pub async fn controlled_by(&self, generation: &str) -> usize {
    self
      .clients
      .read()
      .await
      .values()
      .filter(|c| c.controller.as_deref() == Some(generation))
      .count()
  }
}
