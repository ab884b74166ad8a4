//! Network access for the worker.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::cache::{FetchRequest, FetchResponse};

/// A fetch that produced no HTTP response at all.
///
/// Any HTTP response, whatever its status, is a successful fetch at this
/// layer; only transport failures are errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("network error fetching {url}: {message}")]
  Network { url: String, message: String },

  #[error("request to {url} timed out")]
  Timeout { url: String },
}

impl FetchError {
  pub fn network(url: &Url, message: impl Into<String>) -> Self {
    FetchError::Network {
      url: url.to_string(),
      message: message.into(),
    }
  }

  pub fn url(&self) -> &str {
    match self {
      FetchError::Network { url, .. } | FetchError::Timeout { url } => url,
    }
  }

  fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
    if err.is_timeout() {
      FetchError::Timeout {
        url: url.to_string(),
      }
    } else {
      FetchError::network(url, err.to_string())
    }
  }
}

/// Something that can turn a request into a response.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(
    &self,
    request: &FetchRequest,
  ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}

/// Fetcher backed by a real HTTP client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("gbshell/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| FetchError::network(&request.url, e.to_string()))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::from_reqwest(&request.url, e))?;

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

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::from_reqwest(&request.url, e))?
      .to_vec();

    Ok(FetchResponse {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
pub mod testing {
  //! Scriptable in-process network for tests.

  use super::*;
  use crate::cache::strip_cache_bust;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  #[derive(Default)]
  pub struct FakeNetwork {
    routes: Mutex<HashMap<String, FetchResponse>>,
    offline: AtomicBool,
    requested: Mutex<Vec<String>>,
  }

  impl FakeNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    /// Serve `response` for `url`. Cache-busting parameters are ignored when
    /// matching.
    pub fn respond(&self, url: &str, response: FetchResponse) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every URL fetched so far, as sent.
    pub fn requested(&self) -> Vec<String> {
      self.requested.lock().unwrap().clone()
    }
  }

  impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
      self
        .requested
        .lock()
        .unwrap()
        .push(request.url.to_string());

      if self.offline.load(Ordering::SeqCst) {
        return Err(FetchError::network(&request.url, "connection refused"));
      }

      let routes = self.routes.lock().unwrap();
      let response = routes
        .get(request.url.as_str())
        .or_else(|| routes.get(strip_cache_bust(&request.url).as_str()))
        .cloned()
        .unwrap_or_else(|| FetchResponse::new(404, "not found"));
      Ok(response)
    }
  }
}
