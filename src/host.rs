//! Host-side registration: which agent instance currently serves requests.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::agent::{ActivationReport, InstallReport, MessageOutcome, OfflineAgent, Phase};
use crate::cache::{CacheResult, CacheStorage};
use crate::http::{Request, Response};
use crate::network::Network;

/// Reports from installing and activating a newly registered agent.
#[derive(Debug)]
pub struct RegisterReport {
  pub install: InstallReport,
  pub activation: ActivationReport,
}

/// Drives agent lifecycles the way a hosting environment does.
pub struct Registration<S: CacheStorage, N: Network> {
  active: Mutex<Option<Arc<OfflineAgent<S, N>>>>,
  /// Network used for requests when no agent is active
  network: Arc<N>,
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
  pub fn new(network: Arc<N>) -> Self {
    Self {
      active: Mutex::new(None),
      network,
    }
  }

  pub async fn active(&self) -> Option<Arc<OfflineAgent<S, N>>> {
    self.active.lock().await.clone()
  }

  /// Install a new agent version, then hand it control.
  ///
  /// The agent asks to skip waiting once installed, so activation follows
  /// immediately. A failed install is returned as an error, the agent is
  /// discarded and the previous generation stays active.
  pub async fn register(&self, agent: Arc<OfflineAgent<S, N>>) -> Result<RegisterReport> {
    let install = agent.install().await?;
    if install.phase != Phase::Activating {
      return Err(eyre!(
        "{} installed but is still waiting ({})",
        install.generation,
        install.phase
      ));
    }

    // Writes still pending in the old generation must land before its
    // store is deleted
    if let Some(previous) = self.active().await {
      previous.settle().await;
    }

    let activation = agent.activate().await?;
    if !activation.failed.is_empty() {
      warn!(failed = ?activation.failed, "some old caches could not be deleted");
    }

    let previous = self.active.lock().await.replace(agent);
    if let Some(previous) = previous {
      previous.settle().await;
      previous.supersede();
    }

    Ok(RegisterReport {
      install,
      activation,
    })
  }

  /// Restore a generation persisted by a previous run as the active one.
  pub async fn resume(&self, agent: Arc<OfflineAgent<S, N>>) -> Result<bool> {
    if !agent.resume().await? {
      return Ok(false);
    }
    if let Some(previous) = self.active.lock().await.replace(agent) {
      previous.supersede();
    }
    Ok(true)
  }

  /// Deliver a client message to the active agent.
  pub async fn post_message(&self, payload: &Value) -> Result<MessageOutcome> {
    let agent = self
      .active()
      .await
      .ok_or_else(|| eyre!("No active agent to receive the message"))?;
    let outcome = agent.on_message(payload);
    info!(generation = %agent.generation(), ?outcome, "message delivered");
    Ok(outcome)
  }

  /// Route a request to the active agent; uncontrolled requests go to the network.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    match self.active().await {
      Some(agent) => Ok(agent.fetch(request).await),
      None => {
        let response = self.network.fetch(request).await?;
        Ok(CacheResult::from_network(response))
      }
    }
  }

  /// Wait for background cache writes of the active agent.
  pub async fn settle(&self) {
    if let Some(agent) = self.active().await {
      agent.settle().await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::{GenerationId, Manifest};
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::clients::Clients;
  use crate::testing::{get, url, ScriptedNetwork, SlowStorage};
  use serde_json::json;
  use std::time::Duration;

  struct Fixture {
    storage: Arc<MemoryStorage>,
    network: Arc<ScriptedNetwork>,
    clients: Arc<Clients>,
    registration: Registration<MemoryStorage, ScriptedNetwork>,
  }

  impl Fixture {
    fn new() -> Self {
      let network = Arc::new(ScriptedNetwork::new());
      network
        .respond("https://calc.example/", 200, "root")
        .respond("https://calc.example/index.html", 200, "index");
      Self {
        storage: Arc::new(MemoryStorage::new()),
        registration: Registration::new(Arc::clone(&network)),
        network,
        clients: Arc::new(Clients::new()),
      }
    }

    fn agent(&self, generation: &str) -> Arc<OfflineAgent<MemoryStorage, ScriptedNetwork>> {
      Arc::new(OfflineAgent::new(
        GenerationId::new(generation),
        Manifest::resolve(&url("https://calc.example/"), &["./", "./index.html"]).unwrap(),
        Arc::clone(&self.storage),
        Arc::clone(&self.network),
        Arc::clone(&self.clients),
      ))
    }
  }

  #[tokio::test]
  async fn upgrade_replaces_generation_and_evicts_old_store() {
    let fx = Fixture::new();
    let page = fx.clients.open(url("https://calc.example/")).await;

    let v1 = fx.agent("v1");
    let first = fx.registration.register(Arc::clone(&v1)).await.unwrap();
    assert_eq!(first.install.cached, 2);
    assert!(first.activation.deleted.is_empty());

    let v2 = fx.agent("v2");
    let second = fx.registration.register(Arc::clone(&v2)).await.unwrap();
    assert_eq!(second.activation.deleted, vec!["v1"]);
    assert_eq!(second.activation.claimed, 1);

    assert_eq!(fx.storage.keys().unwrap(), vec!["v2"]);
    assert_eq!(v1.phase(), Phase::Redundant);
    assert_eq!(v2.phase(), Phase::Activated);
    assert_eq!(
      fx.clients.get(page).await.unwrap().controller.as_deref(),
      Some("v2")
    );
  }

  #[tokio::test]
  async fn failed_install_keeps_previous_generation_active() {
    let fx = Fixture::new();
    let v1 = fx.agent("v1");
    fx.registration.register(Arc::clone(&v1)).await.unwrap();

    fx.network.fail("https://calc.example/index.html");
    let v2 = fx.agent("v2");
    assert!(fx.registration.register(Arc::clone(&v2)).await.is_err());

    assert_eq!(v2.phase(), Phase::Redundant);
    let active = fx.registration.active().await.unwrap();
    assert_eq!(active.generation().as_str(), "v1");
    assert_eq!(fx.storage.keys().unwrap(), vec!["v1"]);
  }

  #[tokio::test]
  async fn requests_without_active_agent_go_to_network() {
    let fx = Fixture::new();
    let result = fx.registration.fetch(get("https://calc.example/")).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);

    fx.network.go_offline();
    assert!(fx.registration.fetch(get("https://calc.example/")).await.is_err());
  }

  #[tokio::test]
  async fn active_agent_serves_precached_assets_offline() {
    let fx = Fixture::new();
    fx.registration.register(fx.agent("v1")).await.unwrap();
    fx.network.go_offline();

    let result = fx.registration.fetch(get("https://calc.example/index.html")).await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.text().unwrap(), "index");
  }

  #[tokio::test]
  async fn messages_go_to_the_active_agent() {
    let fx = Fixture::new();
    assert!(fx
      .registration
      .post_message(&json!({ "type": "SKIP_WAITING" }))
      .await
      .is_err());

    fx.registration.register(fx.agent("v1")).await.unwrap();
    let outcome = fx
      .registration
      .post_message(&json!({ "type": "SKIP_WAITING" }))
      .await
      .unwrap();
    assert_eq!(outcome, MessageOutcome::SkipWaiting { left_waiting: false });
    assert_eq!(
      fx.registration.post_message(&json!({ "type": "PING" })).await.unwrap(),
      MessageOutcome::Ignored
    );
  }

  #[tokio::test]
  async fn resume_restores_persisted_generation() {
    let fx = Fixture::new();
    fx.storage.open("v1").unwrap();

    assert!(!fx.registration.resume(fx.agent("v0")).await.unwrap());
    assert!(fx.registration.resume(fx.agent("v1")).await.unwrap());
    let active = fx.registration.active().await.unwrap();
    assert_eq!(active.phase(), Phase::Activated);
    assert_eq!(active.generation().as_str(), "v1");
  }

  fn slow_agent(
    generation: &str,
    storage: &Arc<SlowStorage>,
    network: &Arc<ScriptedNetwork>,
    clients: &Arc<Clients>,
  ) -> Arc<OfflineAgent<SlowStorage, ScriptedNetwork>> {
    Arc::new(OfflineAgent::new(
      GenerationId::new(generation),
      Manifest::resolve(&url("https://calc.example/"), &["./", "./index.html"]).unwrap(),
      Arc::clone(storage),
      Arc::clone(network),
      Arc::clone(clients),
    ))
  }

  fn slow_fixture(
    storage: SlowStorage,
  ) -> (
    Arc<SlowStorage>,
    Arc<ScriptedNetwork>,
    Arc<Clients>,
    Registration<SlowStorage, ScriptedNetwork>,
  ) {
    let network = Arc::new(ScriptedNetwork::new());
    network
      .respond("https://calc.example/", 200, "root")
      .respond("https://calc.example/index.html", 200, "index");
    let registration = Registration::new(Arc::clone(&network));
    (Arc::new(storage), network, Arc::new(Clients::new()), registration)
  }

  #[tokio::test]
  async fn pending_write_of_old_generation_does_not_survive_upgrade() {
    let (storage, network, clients, registration) =
      slow_fixture(SlowStorage::new().with_write_delay(Duration::from_millis(300)));
    registration
      .register(slow_agent("v1", &storage, &network, &clients))
      .await
      .unwrap();

    // The write for this response is still sleeping when v2 registers
    network.respond("https://calc.example/late.js", 200, "late");
    let result = registration.fetch(get("https://calc.example/late.js")).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);

    let report = registration
      .register(slow_agent("v2", &storage, &network, &clients))
      .await
      .unwrap();
    registration.settle().await;

    assert_eq!(report.activation.deleted, vec!["v1"]);
    assert_eq!(storage.keys().unwrap(), vec!["v2"]);
  }

  #[tokio::test]
  async fn requests_are_served_while_an_upgrade_activates() {
    let (storage, network, clients, registration) =
      slow_fixture(SlowStorage::new().with_delete_delay(Duration::from_millis(500)));
    registration
      .register(slow_agent("v1", &storage, &network, &clients))
      .await
      .unwrap();

    let upgrade = registration.register(slow_agent("v2", &storage, &network, &clients));
    let request = async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      tokio::time::timeout(
        Duration::from_millis(200),
        registration.fetch(get("https://calc.example/index.html")),
      )
      .await
    };
    let (upgraded, served) = tokio::join!(upgrade, request);

    upgraded.unwrap();
    let served = served.expect("fetch waited for the upgrade").unwrap();
    assert_eq!(served.source, CacheSource::Cache);
    assert_eq!(
      registration.active().await.unwrap().generation().as_str(),
      "v2"
    );
  }
}
