//! The offline cache agent.
//!
//! One agent instance owns one cache generation and handles the four
//! lifecycle events delivered by its host:
//! - install: precache the manifest, all or nothing
//! - activate: delete every other generation, then claim open clients
//! - message: `{ "type": "SKIP_WAITING" }` forces activation
//! - fetch: cache first, network on miss, offline fallback when both fail

mod lifecycle;
mod manifest;
mod message;

pub use lifecycle::{Lifecycle, Phase};
pub use manifest::Manifest;
pub use message::{ClientMessage, MessageOutcome};

use chrono::Utc;
use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use futures::future::{join_all, try_join_all};
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheResult, CacheStorage, CachedResponse};
use crate::clients::Clients;
use crate::config::Config;
use crate::http::{Request, Response};
use crate::network::Network;

/// Name of a cache generation, fixed when the agent is built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationId(String);

impl GenerationId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for GenerationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub generation: GenerationId,
  /// Number of manifest entries stored
  pub cached: usize,
  /// Phase after install; `Activating` when waiting was skipped
  pub phase: Phase,
}

/// Outcome of activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  /// Stale generations removed
  pub deleted: Vec<String>,
  /// Stale generations whose deletion failed
  pub failed: Vec<String>,
  /// False when the generation list could not be read
  pub cleanup_complete: bool,
  /// Clients that switched to this generation
  pub claimed: usize,
}

/// Agent state: generation, lifecycle phase and handles to storage,
/// network and clients.
pub struct OfflineAgent<S: CacheStorage, N: Network> {
  generation: GenerationId,
  manifest: Manifest,
  storage: Arc<S>,
  network: Arc<N>,
  clients: Arc<Clients>,
  lifecycle: Mutex<Lifecycle>,
  /// Cache writes still running after their response was returned
  writes: Mutex<JoinSet<()>>,
}

impl<S: CacheStorage, N: Network> OfflineAgent<S, N> {
  pub fn new(
    generation: GenerationId,
    manifest: Manifest,
    storage: Arc<S>,
    network: Arc<N>,
    clients: Arc<Clients>,
  ) -> Self {
    Self {
      generation,
      manifest,
      storage,
      network,
      clients,
      lifecycle: Mutex::new(Lifecycle::default()),
      writes: Mutex::new(JoinSet::new()),
    }
  }

  /// Build the agent for the generation and manifest named in `config`.
  pub fn from_config(
    config: &Config,
    storage: Arc<S>,
    network: Arc<N>,
    clients: Arc<Clients>,
  ) -> Result<Self> {
    let manifest = Manifest::resolve(&config.scope, config.precache.as_slice())?;
    Ok(Self::new(
      GenerationId::new(config.cache_name.clone()),
      manifest,
      storage,
      network,
      clients,
    ))
  }

  pub fn generation(&self) -> &GenerationId {
    &self.generation
  }

  pub fn manifest(&self) -> &Manifest {
    &self.manifest
  }

  pub fn clients(&self) -> &Arc<Clients> {
    &self.clients
  }

  pub fn phase(&self) -> Phase {
    self.lifecycle().phase()
  }

  pub fn is_waiting(&self) -> bool {
    self.lifecycle().is_waiting()
  }

  fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
    self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn writes(&self) -> MutexGuard<'_, JoinSet<()>> {
    self.writes.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Run a storage operation off the async workers.
  async fn with_storage<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    tokio::task::spawn_blocking(move || f(&storage))
      .await
      .map_err(|e| eyre!("Storage task failed: {}", e))?
  }

  // ==========================================================================
  // install
  // ==========================================================================

  /// Precache every manifest entry into this generation's store.
  ///
  /// All entries are fetched, then written in one batch. Any failed fetch or
  /// non-2xx response fails the whole install and the agent becomes
  /// redundant; nothing is retried.
  pub async fn install(&self) -> Result<InstallReport> {
    self.lifecycle().begin_install()?;
    info!(generation = %self.generation, "installing");

    match self.precache().await {
      Ok(cached) => {
        let phase = {
          let mut lifecycle = self.lifecycle();
          lifecycle.install_succeeded()?;
          lifecycle.skip_waiting();
          lifecycle.phase()
        };
        info!(generation = %self.generation, cached, %phase, "installed");
        Ok(InstallReport {
          generation: self.generation.clone(),
          cached,
          phase,
        })
      }
      Err(e) => {
        error!(generation = %self.generation, error = %e, "cache installation failed");
        self.lifecycle().install_failed();
        Err(e.wrap_err(format!("Install of {} failed", self.generation)))
      }
    }
  }

  async fn precache(&self) -> Result<usize> {
    self.manifest.ensure_unique()?;

    let fetches = self.manifest.urls().iter().map(|url| async move {
      let response = self
        .network
        .fetch(Request::get(url.clone()))
        .await
        .wrap_err_with(|| format!("Failed to precache {}", url))?;

      if !response.ok() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          url,
          response.status().as_u16()
        ));
      }
      Ok::<_, color_eyre::Report>((Request::get(url.clone()), response))
    });
    let entries = try_join_all(fetches).await?;
    let cached = entries.len();

    let name = self.generation.to_string();
    debug!(generation = %name, cached, "caching app files");
    self
      .with_storage(move |storage| storage.put_all(&name, entries))
      .await?;

    Ok(cached)
  }

  // ==========================================================================
  // activate
  // ==========================================================================

  /// Delete every other generation, then claim all open clients.
  ///
  /// Cleanup failures are logged and reported but never prevent claiming.
  pub async fn activate(&self) -> Result<ActivationReport> {
    self.lifecycle().begin_activate()?;
    info!(generation = %self.generation, "activating");

    let mut report = self.delete_stale_generations().await;
    report.claimed = self.clients.claim(self.generation.as_str()).await;

    self.lifecycle().activated()?;
    info!(
      generation = %self.generation,
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      claimed = report.claimed,
      "activated"
    );
    Ok(report)
  }

  async fn delete_stale_generations(&self) -> ActivationReport {
    let names = match self.with_storage(|storage| storage.keys()).await {
      Ok(names) => names,
      Err(e) => {
        warn!(generation = %self.generation, error = %e, "failed to list caches");
        return ActivationReport::default();
      }
    };

    let stale: Vec<String> = names
      .into_iter()
      .filter(|name| name != self.generation.as_str())
      .collect();
    let deletions = stale.into_iter().map(|name| async move {
      info!(cache = %name, "deleting old cache");
      let target = name.clone();
      let result = self
        .with_storage(move |storage| storage.delete(&target))
        .await;
      (name, result)
    });

    let mut report = ActivationReport {
      cleanup_complete: true,
      ..ActivationReport::default()
    };
    for (name, result) in join_all(deletions).await {
      match result {
        Ok(_) => report.deleted.push(name),
        Err(e) => {
          warn!(cache = %name, error = %e, "failed to delete old cache");
          report.failed.push(name);
        }
      }
    }
    report
  }

  /// Take over a generation persisted by an earlier run without reinstalling.
  ///
  /// Returns false, leaving the agent untouched, if the store does not exist.
  pub async fn resume(&self) -> Result<bool> {
    let name = self.generation.to_string();
    if !self.with_storage(move |storage| storage.has(&name)).await? {
      return Ok(false);
    }
    self.lifecycle().resume()?;
    let claimed = self.clients.claim(self.generation.as_str()).await;
    info!(generation = %self.generation, claimed, "resumed");
    Ok(true)
  }

  /// Mark this instance as replaced by a newer generation.
  pub fn supersede(&self) {
    self.lifecycle().supersede();
    info!(generation = %self.generation, "superseded");
  }

  // ==========================================================================
  // message
  // ==========================================================================

  /// Handle a client message. Only `{ "type": "SKIP_WAITING" }` does anything.
  pub fn on_message(&self, payload: &Value) -> MessageOutcome {
    match ClientMessage::parse(payload) {
      Some(ClientMessage::SkipWaiting) => {
        let left_waiting = self.lifecycle().skip_waiting();
        debug!(generation = %self.generation, left_waiting, "skip waiting requested");
        MessageOutcome::SkipWaiting { left_waiting }
      }
      None => {
        debug!(generation = %self.generation, "ignoring unrecognized message");
        MessageOutcome::Ignored
      }
    }
  }

  // ==========================================================================
  // fetch
  // ==========================================================================

  /// Serve a request: cache first, then network, then the offline fallback.
  ///
  /// Only status 200 responses are stored. The store write runs in the
  /// background; the response is returned without waiting for it.
  pub async fn fetch(&self, request: Request) -> CacheResult<Response> {
    match self.lookup(&request).await {
      Ok(Some(cached)) => {
        debug!(url = %request.url(), "cache hit");
        return CacheResult::from_cache(cached.response, cached.cached_at);
      }
      Ok(None) => {}
      Err(e) => {
        warn!(url = %request.url(), error = %e, "cache lookup failed, treating as miss");
      }
    }

    let response = match self.network.fetch(request.duplicate()).await {
      Ok(response) => response,
      Err(e) => {
        info!(url = %request.url(), error = %e, "fetch failed; returning offline response");
        return CacheResult::offline(Response::offline());
      }
    };

    if response.status() != StatusCode::OK {
      debug!(url = %request.url(), status = response.status().as_u16(), "not caching response");
      return CacheResult::from_network(response);
    }

    self.store_in_background(request, response.duplicate());
    CacheResult::from_network(response)
  }

  async fn lookup(&self, request: &Request) -> Result<Option<CachedResponse>> {
    let name = self.generation.to_string();
    let request = request.duplicate();
    self
      .with_storage(move |storage| storage.match_request(&name, &request))
      .await
  }

  fn store_in_background(&self, request: Request, response: Response) {
    let storage = Arc::clone(&self.storage);
    let name = self.generation.to_string();

    let mut writes = self.writes();
    // Reap finished writes so the set does not grow without bound
    while writes.try_join_next().is_some() {}

    writes.spawn_blocking(move || {
      let started = Utc::now();
      match storage.put(&name, &request, response) {
        Ok(()) => debug!(
          url = %request.url(),
          elapsed_ms = (Utc::now() - started).num_milliseconds(),
          "stored response"
        ),
        Err(e) => warn!(url = %request.url(), error = %e, "failed to store response"),
      }
    });
  }

  /// Wait for every background cache write started so far.
  pub async fn settle(&self) {
    let mut writes = std::mem::take(&mut *self.writes());
    while let Some(result) = writes.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "cache write task failed");
      }
    }
  }
}
