//! Network access behind the `Fetcher` seam.

use std::future::Future;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use thiserror::Error;

use crate::config::NetworkConfig;
use crate::http::{Request, Response};

/// A request that never produced a response.
///
/// HTTP error statuses are not fetch errors; they come back as a `Response`.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network unreachable: {0}")]
  Network(String),

  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("request aborted")]
  Aborted,
}

/// Something that can send a request over the network.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, FetchError>> + Send;
}

/// `reqwest` backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  timeout: Option<Duration>,
}

impl HttpFetcher {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let timeout = config.timeout_secs.map(Duration::from_secs);

    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, timeout })
  }

  fn map_error(&self, err: reqwest::Error) -> FetchError {
    match self.timeout {
      Some(timeout) if err.is_timeout() => FetchError::Timeout(timeout),
      _ => FetchError::Network(err.to_string()),
    }
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(|e| self.map_error(e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    // Read the whole body before anyone gets to cache it
    let body = response.bytes().await.map_err(|e| self.map_error(e))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}
