use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::agent::{ActivationReport, InstallReport, MessageOutcome, OfflineAgent};
use crate::cache::{CacheResult, CacheStorage};
use crate::http::{Request, Response};
use crate::network::Network;

/// Lifecycle events delivered to the agent, each with its reply channel
#[derive(Debug)]
pub enum AgentEvent {
  /// New version loaded; reply resolves when precaching finishes
  Install(oneshot::Sender<Result<InstallReport>>),
  /// Generation takes control; reply resolves after cleanup and claim
  Activate(oneshot::Sender<Result<ActivationReport>>),
  /// Client posted a message
  Message(Value, oneshot::Sender<MessageOutcome>),
  /// Controlled client issued a request
  Fetch(Request, oneshot::Sender<CacheResult<Response>>),
}

/// Sending half held by the host
#[derive(Clone)]
pub struct EventSender {
  tx: mpsc::UnboundedSender<AgentEvent>,
}

impl EventSender {
  pub async fn install(&self) -> Option<Result<InstallReport>> {
    let (reply, rx) = oneshot::channel();
    self.tx.send(AgentEvent::Install(reply)).ok()?;
    rx.await.ok()
  }

  pub async fn activate(&self) -> Option<Result<ActivationReport>> {
    let (reply, rx) = oneshot::channel();
    self.tx.send(AgentEvent::Activate(reply)).ok()?;
    rx.await.ok()
  }

  pub async fn message(&self, payload: Value) -> Option<MessageOutcome> {
    let (reply, rx) = oneshot::channel();
    self.tx.send(AgentEvent::Message(payload, reply)).ok()?;
    rx.await.ok()
  }

  pub async fn fetch(&self, request: Request) -> Option<CacheResult<Response>> {
    let (reply, rx) = oneshot::channel();
    self.tx.send(AgentEvent::Fetch(request, reply)).ok()?;
    rx.await.ok()
  }
}

/// Event loop feeding one agent
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<AgentEvent>,
}

impl EventHandler {
  pub fn new() -> (Self, EventSender) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { rx }, EventSender { tx })
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<AgentEvent> {
    self.rx.recv().await
  }

  /// Dispatch events until every sender is dropped.
  ///
  /// Each event runs on its own task so independent fetches interleave.
  pub async fn run<S, N>(mut self, agent: Arc<OfflineAgent<S, N>>)
  where
    S: CacheStorage,
    N: Network,
  {
    while let Some(event) = self.next().await {
      let agent = Arc::clone(&agent);
      tokio::spawn(async move { dispatch(&agent, event).await });
    }
    agent.settle().await;
  }
}

/// Route one event to the matching handler and send back its result.
pub async fn dispatch<S, N>(agent: &OfflineAgent<S, N>, event: AgentEvent)
where
  S: CacheStorage,
  N: Network,
{
  let delivered = match event {
    AgentEvent::Install(reply) => reply.send(agent.install().await).is_ok(),
    AgentEvent::Activate(reply) => reply.send(agent.activate().await).is_ok(),
    AgentEvent::Message(payload, reply) => reply.send(agent.on_message(&payload)).is_ok(),
    AgentEvent::Fetch(request, reply) => reply.send(agent.fetch(request).await).is_ok(),
  };

  if !delivered {
    warn!(generation = %agent.generation(), "event reply dropped by host");
  }
}
