//! Stored form of a cached response and request matching.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::VARY;
use reqwest::{Method, StatusCode};

use super::traits::RequestKey;
use crate::http::{header_pairs, headers_from_pairs, Request, Response};

/// A response as persisted in a cache store.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub key: String,
  pub method: String,
  pub url: String,
  /// Request header values named by the response's `Vary` header at put time
  pub vary: Vec<(String, Option<String>)>,
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

/// A response served from a cache store.
#[derive(Debug)]
pub struct CachedResponse {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

impl StoredEntry {
  /// Build a storable entry. Only GET requests can be stored.
  pub fn new(request: &Request, response: Response) -> Result<Self> {
    if request.method() != Method::GET {
      return Err(eyre!(
        "Request method '{}' is unsupported for caching ({})",
        request.method(),
        request.url()
      ));
    }

    let key = RequestKey::from_request(request);
    let vary = vary_names(&response)
      .into_iter()
      .map(|name| {
        let value = request.header(&name).map(String::from);
        (name, value)
      })
      .collect();

    let headers = header_pairs(response.headers());
    let status = response.status().as_u16();
    let status_text = response.status_text().to_string();

    Ok(Self {
      key: key.cache_hash(),
      method: key.method().to_string(),
      url: key.url().to_string(),
      vary,
      status,
      status_text,
      headers,
      body: response.into_bytes(),
      cached_at: Utc::now(),
    })
  }

  /// Whether this entry answers `request`, honoring the stored `Vary` header.
  pub fn matches(&self, request: &Request) -> bool {
    if self.is_vary_wildcard() {
      return false;
    }
    self
      .vary
      .iter()
      .all(|(name, value)| request.header(name) == value.as_deref())
  }

  fn is_vary_wildcard(&self) -> bool {
    self
      .headers
      .iter()
      .filter(|(name, _)| name.eq_ignore_ascii_case(VARY.as_str()))
      .any(|(_, value)| value.split(',').any(|v| v.trim() == "*"))
  }

  pub fn into_cached(self) -> Result<CachedResponse> {
    let status = StatusCode::from_u16(self.status)
      .map_err(|e| eyre!("Invalid stored status {} for {}: {}", self.status, self.url, e))?;
    let headers = headers_from_pairs(&self.headers)?;
    let response = Response::new(status, self.body)
      .with_status_text(self.status_text)
      .with_headers(headers);

    Ok(CachedResponse {
      response,
      cached_at: self.cached_at,
    })
  }
}

/// Lowercased header names listed in the response's `Vary` header, `*` excluded.
fn vary_names(response: &Response) -> Vec<String> {
  response
    .headers()
    .get_all(VARY)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(','))
    .map(|name| name.trim().to_ascii_lowercase())
    .filter(|name| !name.is_empty() && name != "*")
    .collect()
}

/// Look up the request among entries, returning a response only for GET.
pub fn lookup<'a, I>(entries: I, request: &Request) -> Option<&'a StoredEntry>
where
  I: IntoIterator<Item = &'a StoredEntry>,
{
  if request.method() != Method::GET {
    return None;
  }
  let key = RequestKey::from_request(request).cache_hash();
  entries
    .into_iter()
    .find(|entry| entry.key == key && entry.matches(request))
}
