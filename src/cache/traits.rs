//! Core types for the caching system.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::Request;

/// Identity of a request inside a cache store: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: Method,
  url: Url,
}

impl RequestKey {
  pub fn from_request(request: &Request) -> Self {
    let mut url = request.url().clone();
    url.set_fragment(None);
    Self {
      method: request.method().clone(),
      url,
    }
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// Stable, fixed-length key used as the storage primary key.
  pub fn cache_hash(&self) -> String {
    let input = format!("{} {}", self.method, self.url);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Result of a fetch through the agent, including where the response came from.
#[derive(Debug)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Synthesized data served because neither cache nor network could answer.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the network (may or may not have been stored)
  Network,
  /// Served from the current generation's cache store
  Cache,
  /// Network unavailable and nothing cached: synthetic fallback
  Offline,
}
