//! Network access used on cache misses and during precaching.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::http::{Request, Response};

/// The network-fetch primitive.
///
/// An `Err` means the request never produced a response (offline, DNS
/// failure, connection reset). HTTP error statuses are `Ok` responses.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;
}

/// reqwest-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = client_builder(config)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

/// Redirects are not followed: a 3xx reaches the agent as-is and is never
/// cached under the original request.
fn client_builder(config: &NetworkConfig) -> reqwest::ClientBuilder {
  reqwest::Client::builder()
    .timeout(config.timeout())
    .redirect(reqwest::redirect::Policy::none())
    .user_agent(concat!("offline-agent/", env!("CARGO_PKG_VERSION")))
}

impl Network for HttpNetwork {
  fn fetch(&self, request: Request) -> impl Future<Output = Result<Response>> + Send {
    let client = self.client.clone();
    async move {
      let method = request.method().clone();
      let url = request.url().clone();
      let headers = request.headers().clone();

      let mut builder = client.request(method.clone(), url.clone()).headers(headers);
      if let Some(body) = request.into_body() {
        builder = builder.body(body);
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Failed to fetch {} {}: {}", method, url, e))?;

      let status = response.status();
      let headers = response.headers().clone();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

      debug!(%method, %url, status = status.as_u16(), bytes = body.len(), "network response");

      Ok(Response::new(status, body.to_vec()).with_headers(headers))
    }
  }
}
