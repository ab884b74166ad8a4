//! Versioned bucket naming and bucket handles.

use color_eyre::Result;
use std::sync::Arc;

use super::storage::CacheStore;
use super::traits::{CacheKey, CachedEntry, FetchResponse};

/// The role a bucket plays. Each role gets its own versioned name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
  /// Precached application shell
  Static,
  /// Icons and manifest, refreshed on every fetch
  Icons,
  /// Runtime-cached assets
  Dynamic,
  /// API responses
  Api,
}

impl BucketKind {
  fn label(self) -> &'static str {
    match self {
      BucketKind::Static => "static",
      BucketKind::Icons => "icons",
      BucketKind::Dynamic => "dynamic",
      BucketKind::Api => "api",
    }
  }
}

/// Computes the designated bucket names.
///
/// Static and icon buckets follow the build version. Dynamic and API buckets
/// follow the app version announced by the page, which can change at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNames {
  prefix: String,
  build_version: String,
  app_version: String,
}

impl BucketNames {
  pub fn new(prefix: &str, build_version: &str) -> Self {
    Self {
      prefix: prefix.to_string(),
      build_version: build_version.to_string(),
      app_version: build_version.to_string(),
    }
  }

  /// Prefix shared by every bucket this application owns, including the
  /// separator, e.g. `gradebook-`.
  pub fn owned_prefix(&self) -> String {
    format!("{}-", self.prefix)
  }

  pub fn set_app_version(&mut self, version: &str) {
    self.app_version = version.to_string();
  }

  pub fn name(&self, kind: BucketKind) -> String {
    let version = match kind {
      BucketKind::Static | BucketKind::Icons => &self.build_version,
      BucketKind::Dynamic | BucketKind::Api => &self.app_version,
    };
    format!("{}-{}-{}", self.prefix, kind.label(), version)
  }

  /// Every currently designated name. Anything else with the prefix is stale.
  pub fn current(&self) -> Vec<String> {
    [
      BucketKind::Static,
      BucketKind::Icons,
      BucketKind::Dynamic,
      BucketKind::Api,
    ]
    .into_iter()
    .map(|kind| self.name(kind))
    .collect()
  }
}

/// A named bucket bound to its store.
pub struct Bucket<S: CacheStore> {
  store: Arc<S>,
  name: String,
}

impl<S: CacheStore> Bucket<S> {
  /// Open a bucket, creating it if needed.
  pub fn open(store: Arc<S>, name: impl Into<String>) -> Result<Self> {
    let name = name.into();
    store.open(&name)?;
    Ok(Self { store, name })
  }

  /// A handle that does not touch storage until the first read or write.
  pub fn lazy(store: Arc<S>, name: impl Into<String>) -> Self {
    Self {
      store,
      name: name.into(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>> {
    self.store.get(&self.name, key)
  }

  pub fn put(&self, key: &CacheKey, response: &FetchResponse) -> Result<()> {
    self.store.put(&self.name, key, response)
  }
}

impl<S: CacheStore> Clone for Bucket<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      name: self.name.clone(),
    }
  }
}
