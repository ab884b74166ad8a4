//! Request resolution policies.
//!
//! Every policy resolves a request to a response or a [`FetchError`]. Cache
//! writes made while serving happen on a background task after the response
//! is already on its way back, and a failed write never changes the result.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{
  strip_cache_bust, Bucket, CacheKey, CacheStore, FetchRequest, FetchResponse, CACHE_BUST_PARAM,
};
use crate::config::CacheConfig;

use super::fetcher::{FetchError, Fetcher};

/// The policy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Not intercepted: cross-origin or not cacheable
  Passthrough,
  /// Cache-busted network fetch, stored under the plain key
  NetworkFirstRefresh,
  NetworkFirst,
  /// Network, falling back to the offline document
  NavigationFallback,
  CacheFirst,
}

/// Pick a strategy for a request. First match wins:
/// icons, manifest, API prefixes, navigations, then everything else.
pub fn classify(rules: &CacheConfig, origin: &Url, request: &FetchRequest) -> Strategy {
  if request.url.origin() != origin.origin() || !request.is_get() {
    return Strategy::Passthrough;
  }

  let path = request.url.path();

  if rules
    .icons
    .iter()
    .any(|icon| path == icon || path.ends_with(icon.as_str()))
  {
    return Strategy::NetworkFirstRefresh;
  }

  if !rules.manifest.is_empty() && path.ends_with(rules.manifest.as_str()) {
    return Strategy::NetworkFirstRefresh;
  }

  if rules
    .api_prefixes
    .iter()
    .any(|prefix| path.starts_with(prefix.as_str()))
  {
    return Strategy::NetworkFirst;
  }

  if request.is_navigation() {
    return Strategy::NavigationFallback;
  }

  Strategy::CacheFirst
}

/// Split a request into the request actually sent (with a fresh cache-busting
/// parameter) and the key its response is stored under (without one).
pub fn refresh_keys(request: &FetchRequest, now: DateTime<Utc>) -> (FetchRequest, CacheKey) {
  let mut url = strip_cache_bust(&request.url);
  url
    .query_pairs_mut()
    .append_pair(CACHE_BUST_PARAM, &now.timestamp_millis().to_string());

  (request.with_url(url), request.cache_key())
}

/// Store a response without holding up the caller. The task is detached and
/// completes whatever happens to the request afterwards.
fn persist_in_background<S: CacheStore>(bucket: Bucket<S>, key: CacheKey, response: FetchResponse) {
  let _detached = tokio::task::spawn_blocking(move || match bucket.put(&key, &response) {
    Ok(()) => debug!(bucket = bucket.name(), %key, "cached response"),
    Err(e) => warn!(bucket = bucket.name(), %key, error = %e, "cache write failed"),
  });
}

/// Read from one bucket, treating a storage error as a miss.
fn lookup<S: CacheStore>(bucket: &Bucket<S>, key: &CacheKey) -> Option<FetchResponse> {
  match bucket.get(key) {
    Ok(entry) => entry.map(|e| e.response),
    Err(e) => {
      warn!(bucket = bucket.name(), %key, error = %e, "cache read failed");
      None
    }
  }
}

/// Search every bucket, treating a storage error as a miss.
fn lookup_any<S: CacheStore>(store: &S, key: &CacheKey) -> Option<FetchResponse> {
  match store.match_any(key) {
    Ok(entry) => entry.map(|e| e.response),
    Err(e) => {
      warn!(%key, error = %e, "cache search failed");
      None
    }
  }
}

/// The resolution policies, bound to a store and a network.
pub struct Strategies<S: CacheStore, N: Fetcher> {
  store: Arc<S>,
  network: Arc<N>,
}

impl<S: CacheStore, N: Fetcher> Strategies<S, N> {
  pub fn new(store: Arc<S>, network: Arc<N>) -> Self {
    Self { store, network }
  }

  pub fn store(&self) -> &Arc<S> {
    &self.store
  }

  pub fn network(&self) -> &Arc<N> {
    &self.network
  }

  /// Network untouched; nothing read from or written to the cache.
  pub async fn passthrough(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
    self.network.fetch(request).await
  }

  /// Live response when reachable, cached copy otherwise.
  pub async fn network_first(
    &self,
    request: &FetchRequest,
    bucket: Bucket<S>,
  ) -> Result<FetchResponse, FetchError> {
    let key = request.cache_key();

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          persist_in_background(bucket, key, response.clone());
        }
        Ok(response)
      }
      Err(err) => {
        debug!(%key, error = %err, "network failed, trying cache");
        lookup(&bucket, &key).ok_or(err)
      }
    }
  }

  /// Like network-first, but the outbound request carries a cache-busting
  /// parameter and only a 200 is stored, under the original key.
  pub async fn network_first_refresh(
    &self,
    request: &FetchRequest,
    bucket: Bucket<S>,
    now: DateTime<Utc>,
  ) -> Result<FetchResponse, FetchError> {
    let (outbound, key) = refresh_keys(request, now);

    match self.network.fetch(&outbound).await {
      Ok(response) => {
        if response.status == 200 {
          persist_in_background(bucket, key, response.clone());
        }
        Ok(response)
      }
      Err(err) => {
        debug!(%key, error = %err, "refresh failed, trying cache");
        lookup(&bucket, &key).ok_or(err)
      }
    }
  }

  /// Cached copy when present, network otherwise. Image requests that fail
  /// completely get the fallback image, if one is cached.
  pub async fn cache_first(
    &self,
    request: &FetchRequest,
    bucket: Bucket<S>,
    fallback_image: Option<&FetchRequest>,
  ) -> Result<FetchResponse, FetchError> {
    let key = request.cache_key();

    if let Some(cached) = lookup_any(self.store.as_ref(), &key) {
      return Ok(cached);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          persist_in_background(bucket, key, response.clone());
        }
        Ok(response)
      }
      Err(err) => {
        if request.wants_image() {
          if let Some(fallback) =
            fallback_image.and_then(|f| lookup_any(self.store.as_ref(), &f.cache_key()))
          {
            debug!(%key, "serving fallback image");
            return Ok(fallback);
          }
        }
        Err(err)
      }
    }
  }

  /// Top-level navigation: the live document, or the offline page.
  pub async fn navigation(
    &self,
    request: &FetchRequest,
    offline_page: &FetchRequest,
  ) -> Result<FetchResponse, FetchError> {
    match self.network.fetch(request).await {
      Ok(response) => Ok(response),
      Err(err) => {
        debug!(url = %request.url, error = %err, "navigation failed, serving offline page");
        lookup_any(self.store.as_ref(), &offline_page.cache_key()).ok_or(err)
      }
    }
  }
}
