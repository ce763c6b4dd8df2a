//! Test doubles shared by the unit tests.

use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, MemoryStorage, StoredEntry, WriteMode};
use crate::http::{Request, Response};
use crate::network::Network;

#[derive(Clone)]
enum Route {
  Respond(StatusCode, String),
  Fail,
}

/// Network answering from a fixed routing table and recording every call.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) -> &Self {
    let status = StatusCode::from_u16(status).unwrap();
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Route::Respond(status, body.to_string()));
    self
  }

  pub fn fail(&self, url: &str) -> &Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Route::Fail);
    self
  }

  /// Make every route fail, as when the device goes offline.
  pub fn go_offline(&self) {
    for route in self.routes.lock().unwrap().values_mut() {
      *route = Route::Fail;
    }
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Network for ScriptedNetwork {
  fn fetch(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
    let url = request.url().to_string();
    self.calls.lock().unwrap().push(url.clone());
    let route = self.routes.lock().unwrap().get(&url).cloned();

    async move {
      match route {
        Some(Route::Respond(status, body)) => Ok(Response::new(status, body)),
        Some(Route::Fail) | None => Err(eyre!("network unreachable: {}", url)),
      }
    }
  }
}

/// Memory storage whose runtime writes and deletions take a fixed time.
#[derive(Default)]
pub struct SlowStorage {
  inner: MemoryStorage,
  write_delay: Duration,
  delete_delay: Duration,
}

impl SlowStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_write_delay(mut self, delay: Duration) -> Self {
    self.write_delay = delay;
    self
  }

  pub fn with_delete_delay(mut self, delay: Duration) -> Self {
    self.delete_delay = delay;
    self
  }
}

impl CacheStorage for SlowStorage {
  fn open(&self, name: &str) -> Result<()> {
    self.inner.open(name)
  }

  fn has(&self, name: &str) -> Result<bool> {
    self.inner.has(name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    self.inner.keys()
  }

  fn delete(&self, name: &str) -> Result<bool> {
    std::thread::sleep(self.delete_delay);
    self.inner.delete(name)
  }

  fn match_request(&self, name: &str, request: &Request) -> Result<Option<CachedResponse>> {
    self.inner.match_request(name, request)
  }

  fn put_entries(&self, name: &str, entries: Vec<StoredEntry>, mode: WriteMode) -> Result<()> {
    if mode == WriteMode::Existing {
      std::thread::sleep(self.write_delay);
    }
    self.inner.put_entries(name, entries, mode)
  }
}

pub fn url(s: &str) -> Url {
  Url::parse(s).unwrap()
}

pub fn get(s: &str) -> Request {
  Request::get(url(s))
}
