//! Request and response values flowing through the fetch path.
//!
//! Neither type implements `Clone`. A body is consumed by value, so any code
//! that needs to both keep and forward a message calls `duplicate()` first.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use url::Url;

/// Body text of the synthetic response served when both cache and network miss.
pub const OFFLINE_BODY: &str = "App is offline. Please check your connection.";

/// An outgoing request issued by a controlled client.
#[derive(Debug)]
pub struct Request {
  method: Method,
  url: Url,
  headers: HeaderMap,
  body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  /// Header value as a string, if present and valid UTF-8.
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).and_then(|v| v.to_str().ok())
  }

  pub fn into_body(self) -> Option<Vec<u8>> {
    self.body
  }

  /// Copy of this request that can be handed to the network layer
  /// while the original stays available as a cache key.
  pub fn duplicate(&self) -> Self {
    Self {
      method: self.method.clone(),
      url: self.url.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }
}

/// A response, either from the network, from a cache store, or synthesized.
#[derive(Debug)]
pub struct Response {
  status: StatusCode,
  status_text: String,
  headers: HeaderMap,
  body: Vec<u8>,
}

impl Response {
  /// Create a response with the canonical reason phrase as status text.
  pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers: HeaderMap::new(),
      body: body.into(),
    }
  }

  pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
    self.status_text = status_text.into();
    self
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn with_headers(mut self, headers: HeaderMap) -> Self {
    self.headers = headers;
    self
  }

  /// The fallback served when the network is unreachable and nothing is cached.
  pub fn offline() -> Self {
    Self::new(StatusCode::SERVICE_UNAVAILABLE, OFFLINE_BODY)
      .with_status_text("Service Unavailable")
      .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
  }

  pub fn status(&self) -> StatusCode {
    self.status
  }

  pub fn status_text(&self) -> &str {
    &self.status_text
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name).and_then(|v| v.to_str().ok())
  }

  /// True for statuses in the 200-299 range.
  pub fn ok(&self) -> bool {
    self.status.is_success()
  }

  pub fn body_len(&self) -> usize {
    self.body.len()
  }

  /// Copy of this response: one copy is persisted, the other returned.
  pub fn duplicate(&self) -> Self {
    Self {
      status: self.status,
      status_text: self.status_text.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.body
  }

  pub fn text(self) -> Result<String> {
    String::from_utf8(self.body).map_err(|e| eyre!("Response body is not UTF-8: {}", e))
  }
}

/// Flatten headers into name/value pairs for storage.
pub fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect()
}

/// Rebuild a header map from stored name/value pairs.
pub fn headers_from_pairs(pairs: &[(String, String)]) -> Result<HeaderMap> {
  let mut headers = HeaderMap::new();
  for (name, value) in pairs {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid stored header name '{}': {}", name, e))?;
    let value = HeaderValue::from_str(value)
      .map_err(|e| eyre!("Invalid stored header value for '{}': {}", name, e))?;
    headers.append(name, value);
  }
  Ok(headers)
}
