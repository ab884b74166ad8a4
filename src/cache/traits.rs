//! Core request, response and key types for the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Query parameter appended to outbound requests that must bypass
/// intermediate HTTP caches. Never part of a storage key.
pub const CACHE_BUST_PARAM: &str = "_cb";

/// How the request was issued by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level navigation (address bar, link click)
  Navigate,
  /// Sub-resource or script-initiated request
  #[default]
  Other,
}

/// What the page intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  Document,
  Image,
  Script,
  Style,
  Manifest,
  #[default]
  Other,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
}

impl FetchRequest {
  /// A plain sub-resource GET.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::Other,
      destination: Destination::Other,
      headers: Vec::new(),
    }
  }

  /// A top-level navigation to a document.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_uppercase();
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Same request aimed at a different URL.
  pub fn with_url(&self, url: Url) -> Self {
    Self {
      url,
      ..self.clone()
    }
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Whether the request targets an image, by destination or Accept header.
  pub fn wants_image(&self) -> bool {
    self.destination == Destination::Image
      || self
        .header("accept")
        .map(|accept| accept.contains("image/"))
        .unwrap_or(false)
  }

  /// Normalised storage key for this request.
  pub fn cache_key(&self) -> CacheKey {
    CacheKey::for_request(self)
  }
}

/// A response snapshot: status, headers and body at the time of capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// 2xx status
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn content_type(&self) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
      .map(|(_, v)| v.as_str())
  }
}

/// Normalised request descriptor used as the storage key.
///
/// The descriptor is `METHOD url` with the cache-busting parameter and any
/// fragment removed, so a busted network request and a plain page request
/// share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  descriptor: String,
}

impl CacheKey {
  pub fn for_request(request: &FetchRequest) -> Self {
    let url = strip_cache_bust(&request.url);
    Self {
      descriptor: format!("{} {}", request.method.to_uppercase(), url),
    }
  }

  /// Rebuild a key from a descriptor read back from storage.
  pub(crate) fn from_descriptor(descriptor: String) -> Self {
    Self { descriptor }
  }

  pub fn descriptor(&self) -> &str {
    &self.descriptor
  }

  /// SHA256 hash for stable, fixed-length keys
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.descriptor.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.descriptor)
  }
}

/// A stored request/response pair.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub key: CacheKey,
  pub response: FetchResponse,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Remove the cache-busting parameter (and fragment) from a URL.
pub fn strip_cache_bust(url: &Url) -> Url {
  let mut out = url.clone();
  out.set_fragment(None);

  if !url.query_pairs().any(|(k, _)| k == CACHE_BUST_PARAM) {
    return out;
  }

  let kept: Vec<(String, String)> = url
    .query_pairs()
    .filter(|(k, _)| k != CACHE_BUST_PARAM)
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();

  if kept.is_empty() {
    out.set_query(None);
  } else {
    out.query_pairs_mut().clear().extend_pairs(kept);
  }
  out
}
