//! Worker lifecycle: install, activate, messages and fetch dispatch.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{Bucket, BucketKind, BucketNames, CacheStore, FetchRequest, FetchResponse};
use crate::config::CacheConfig;

use super::fetcher::{FetchError, Fetcher};
use super::message::{ClientMessage, WorkerMessage};
use super::strategy::{classify, Strategies, Strategy};

/// Lifecycle states. A worker only intercepts fetches while `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  /// Installed, waiting for older clients to go away
  Waiting,
  Active,
  /// Replaced by a newer worker
  Redundant,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      WorkerState::Installing => "installing",
      WorkerState::Waiting => "waiting",
      WorkerState::Active => "active",
      WorkerState::Redundant => "redundant",
    };
    f.write_str(label)
  }
}

/// Outcome of precaching.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: usize,
  /// Paths that could not be fetched or stored
  pub failed: Vec<String>,
}

impl InstallReport {
  fn merge(mut self, other: InstallReport) -> Self {
    self.cached += other.cached;
    self.failed.extend(other.failed);
    self
  }
}

/// How many undelivered notices a slow client may fall behind by.
const NOTICE_CAPACITY: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn asset_url(origin: &Url, path: &str) -> Result<Url> {
  origin
    .join(path)
    .map_err(|e| eyre!("Invalid asset path '{}': {}", path, e))
}

/// Offline worker for one origin.
pub struct WorkerController<S: CacheStore, N: Fetcher> {
  rules: CacheConfig,
  origin: Url,
  strategies: Strategies<S, N>,
  names: RwLock<BucketNames>,
  state: Mutex<WorkerState>,
  controls_clients: AtomicBool,
  offline_page: FetchRequest,
  fallback_image: FetchRequest,
  notices: broadcast::Sender<WorkerMessage>,
}

impl<S: CacheStore, N: Fetcher> WorkerController<S, N> {
  pub fn new(rules: &CacheConfig, origin: Url, store: Arc<S>, network: Arc<N>) -> Result<Self> {
    let offline_page = FetchRequest::get(asset_url(&origin, &rules.offline_page)?);
    let fallback_image = FetchRequest::get(asset_url(&origin, &rules.fallback_image)?);
    let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

    Ok(Self {
      rules: rules.clone(),
      origin,
      strategies: Strategies::new(store, network),
      names: RwLock::new(BucketNames::new(&rules.prefix, &rules.version)),
      state: Mutex::new(WorkerState::Installing),
      controls_clients: AtomicBool::new(false),
      offline_page,
      fallback_image,
      notices,
    })
  }

  pub fn state(&self) -> WorkerState {
    *lock(&self.state)
  }

  fn set_state(&self, next: WorkerState) {
    let mut state = lock(&self.state);
    if *state != next {
      info!(from = %*state, to = %next, "worker state changed");
      *state = next;
    }
  }

  /// Snapshot of the designated bucket names.
  pub fn names(&self) -> BucketNames {
    self
      .names
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn controls_clients(&self) -> bool {
    self.controls_clients.load(Ordering::SeqCst)
  }

  /// Receive worker broadcasts, like an open tab would.
  pub fn subscribe(&self) -> broadcast::Receiver<WorkerMessage> {
    self.notices.subscribe()
  }

  pub fn store(&self) -> &Arc<S> {
    self.strategies.store()
  }

  fn bucket(&self, names: &BucketNames, kind: BucketKind) -> Bucket<S> {
    Bucket::lazy(Arc::clone(self.strategies.store()), names.name(kind))
  }

  /// Precache the application shell and icons, then activate right away
  /// without waiting for older clients to close.
  pub async fn install(&self) -> Result<InstallReport> {
    self.set_state(WorkerState::Installing);

    let names = self.names();
    let store = Arc::clone(self.strategies.store());
    let opened = Bucket::open(Arc::clone(&store), names.name(BucketKind::Static))
      .and_then(|s| Bucket::open(store, names.name(BucketKind::Icons)).map(|i| (s, i)));
    let (static_bucket, icon_bucket) = match opened {
      Ok(buckets) => buckets,
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        return Err(e.wrap_err("Install failed"));
      }
    };

    let mut icon_paths = self.rules.icons.clone();
    if !self.rules.manifest.is_empty() {
      icon_paths.push(format!("/{}", self.rules.manifest.trim_start_matches('/')));
    }

    let (statics, icons) = futures::join!(
      self.precache(&static_bucket, &self.rules.static_assets),
      self.precache(&icon_bucket, &icon_paths),
    );
    let report = statics.merge(icons);
    info!(
      cached = report.cached,
      failed = report.failed.len(),
      "precache finished"
    );

    self.set_state(WorkerState::Waiting);
    self.skip_waiting();

    Ok(report)
  }

  async fn precache(&self, bucket: &Bucket<S>, paths: &[String]) -> InstallReport {
    let mut report = InstallReport::default();

    let mut requests = Vec::new();
    for path in paths {
      match asset_url(&self.origin, path) {
        Ok(url) => requests.push((path, FetchRequest::get(url))),
        Err(e) => {
          warn!(%path, error = %e, "skipping asset");
          report.failed.push(path.clone());
        }
      }
    }

    let network = self.strategies.network();
    let results =
      futures::future::join_all(requests.iter().map(|(_, request)| network.fetch(request))).await;

    for ((path, request), result) in requests.iter().zip(results) {
      let stored = match result {
        Ok(response) if response.is_success() => bucket
          .put(&request.cache_key(), &response)
          .map_err(|e| e.to_string()),
        Ok(response) => Err(format!("status {}", response.status)),
        Err(e) => Err(e.to_string()),
      };

      match stored {
        Ok(()) => report.cached += 1,
        Err(reason) => {
          warn!(bucket = bucket.name(), %path, %reason, "precache failed");
          report.failed.push((*path).clone());
        }
      }
    }

    report
  }

  /// Activate now if installed and waiting. Returns the pruned buckets.
  pub fn skip_waiting(&self) -> Vec<String> {
    if self.state() == WorkerState::Waiting {
      self.activate()
    } else {
      Vec::new()
    }
  }

  /// Prune stale buckets and take control of every client.
  pub fn activate(&self) -> Vec<String> {
    let deleted = self.prune();
    self.set_state(WorkerState::Active);
    self.controls_clients.store(true, Ordering::SeqCst);
    deleted
  }

  /// A newer worker has started installing.
  pub fn supersede(&self) {
    self.set_state(WorkerState::Redundant);
    self.controls_clients.store(false, Ordering::SeqCst);
  }

  /// Delete buckets with our prefix that are no longer designated.
  fn prune(&self) -> Vec<String> {
    let names = self.names();
    match self
      .strategies
      .store()
      .delete_buckets_not_in(&names.current(), &names.owned_prefix())
    {
      Ok(deleted) => {
        for bucket in &deleted {
          info!(%bucket, "deleted stale cache");
        }
        deleted
      }
      Err(e) => {
        warn!(error = %e, "cache pruning failed");
        Vec::new()
      }
    }
  }

  /// Handle a message posted by a page.
  pub fn handle_message(&self, message: ClientMessage) {
    match message {
      ClientMessage::AppVersion { version } => {
        self
          .names
          .write()
          .unwrap_or_else(PoisonError::into_inner)
          .set_app_version(&version);
        info!(%version, "app version updated");
      }
      ClientMessage::CleanCaches { version } => {
        self.clean_caches(&version);
      }
    }
  }

  /// Handle a raw JSON message.
  pub fn handle_message_json(&self, raw: &str) -> Result<()> {
    let message: ClientMessage =
      serde_json::from_str(raw).map_err(|e| eyre!("Invalid worker message: {}", e))?;
    self.handle_message(message);
    Ok(())
  }

  /// Delete every bucket, re-run pruning and tell every client.
  /// Returns the number of buckets removed.
  fn clean_caches(&self, version: &str) -> usize {
    if self.state() == WorkerState::Waiting {
      self.activate();
    }

    let store = self.strategies.store();
    let mut removed = 0;
    match store.bucket_names() {
      Ok(buckets) => {
        for bucket in buckets {
          match store.delete_bucket(&bucket) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(%bucket, error = %e, "failed to delete cache"),
          }
        }
      }
      Err(e) => warn!(error = %e, "failed to list caches"),
    }

    self.prune();

    let notice = WorkerMessage::CachesCleaned {
      timestamp: Utc::now().timestamp_millis(),
      version: version.to_string(),
    };
    // No subscribers is not an error
    let receivers = self.notices.send(notice).unwrap_or(0);
    info!(removed, receivers, "caches cleaned");

    removed
  }

  /// Resolve a request the way an active worker would.
  pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
    if self.state() != WorkerState::Active || !self.controls_clients() {
      return self.strategies.passthrough(request).await;
    }

    let strategy = classify(&self.rules, &self.origin, request);
    debug!(url = %request.url, ?strategy, "intercepted fetch");

    let names = self.names();
    match strategy {
      Strategy::Passthrough => self.strategies.passthrough(request).await,
      Strategy::NetworkFirstRefresh => {
        self
          .strategies
          .network_first_refresh(request, self.bucket(&names, BucketKind::Icons), Utc::now())
          .await
      }
      Strategy::NetworkFirst => {
        self
          .strategies
          .network_first(request, self.bucket(&names, BucketKind::Api))
          .await
      }
      Strategy::NavigationFallback => {
        self
          .strategies
          .navigation(request, &self.offline_page)
          .await
      }
      Strategy::CacheFirst => {
        self
          .strategies
          .cache_first(
            request,
            self.bucket(&names, BucketKind::Dynamic),
            Some(&self.fallback_image),
          )
          .await
      }
    }
  }
}

/// Pages fetch through the worker, just as in a browser.
impl<S: CacheStore, N: Fetcher> Fetcher for WorkerController<S, N> {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
    self.handle_fetch(request).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::worker::fetcher::testing::FakeNetwork;
  use std::time::Duration;

  const ORIGIN: &str = "https://grades.test";

  fn url(path: &str) -> Url {
    Url::parse(&format!("{}{}", ORIGIN, path)).unwrap()
  }

  fn rules() -> CacheConfig {
    CacheConfig {
      static_assets: vec![
        "/index.html".to_string(),
        "/offline.html".to_string(),
        "/images/fallback.png".to_string(),
        "/missing.js".to_string(),
      ],
      icons: vec!["/favicon.ico".to_string()],
      ..CacheConfig::default()
    }
  }

  fn setup() -> (
    WorkerController<MemoryStorage, FakeNetwork>,
    Arc<MemoryStorage>,
    Arc<FakeNetwork>,
  ) {
    let store = Arc::new(MemoryStorage::new());
    let network = Arc::new(FakeNetwork::new());
    for (path, body) in [
      ("/index.html", "shell"),
      ("/offline.html", "offline"),
      ("/images/fallback.png", "png"),
      ("/favicon.ico", "ico"),
      ("/manifest.json", "{}"),
    ] {
      network.respond(url(path).as_str(), FetchResponse::new(200, body));
    }
    let worker = WorkerController::new(
      &rules(),
      Url::parse(ORIGIN).unwrap(),
      Arc::clone(&store),
      Arc::clone(&network),
    )
    .unwrap();
    (worker, store, network)
  }

  async fn wait_until<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
      if check() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
  }

  #[tokio::test]
  async fn test_install_precaches_and_activates() {
    let (worker, store, _) = setup();
    assert_eq!(worker.state(), WorkerState::Installing);

    let report = worker.install().await.unwrap();
    assert_eq!(report.cached, 5);
    assert_eq!(report.failed, vec!["/missing.js"]);

    assert_eq!(worker.state(), WorkerState::Active);
    assert!(worker.controls_clients());

    let shell = store
      .get(
        "gradebook-static-v1",
        &FetchRequest::get(url("/index.html")).cache_key(),
      )
      .unwrap()
      .unwrap();
    assert_eq!(shell.response.body, b"shell");
    assert!(store
      .get(
        "gradebook-icons-v1",
        &FetchRequest::get(url("/manifest.json")).cache_key()
      )
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_activate_prunes_only_own_stale_buckets() {
    let (worker, store, _) = setup();
    store.open("gradebook-static-v0").unwrap();
    store.open("gradebook-api-v0").unwrap();
    store.open("someone-else-v0").unwrap();

    worker.install().await.unwrap();

    let names = store.bucket_names().unwrap();
    assert!(!names.contains(&"gradebook-static-v0".to_string()));
    assert!(!names.contains(&"gradebook-api-v0".to_string()));
    assert!(names.contains(&"someone-else-v0".to_string()));
    assert!(names.contains(&"gradebook-static-v1".to_string()));
  }

  #[tokio::test]
  async fn test_fetch_before_activation_is_not_intercepted() {
    let (worker, store, network) = setup();

    let response = worker
      .handle_fetch(&FetchRequest::get(url("/favicon.ico")))
      .await
      .unwrap();
    assert_eq!(response.body, b"ico");
    assert_eq!(network.requested(), vec!["https://grades.test/favicon.ico"]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.bucket_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_favicon_fetch_uses_refresh_strategy() {
    let (worker, store, network) = setup();
    worker.install().await.unwrap();
    store.delete_bucket("gradebook-icons-v1").unwrap();

    let request = FetchRequest::get(url("/favicon.ico"));
    let response = worker.handle_fetch(&request).await.unwrap();
    assert_eq!(response.body, b"ico");

    let last = network.requested().pop().unwrap();
    assert!(last.starts_with("https://grades.test/favicon.ico?_cb="));

    let key = request.cache_key();
    wait_until(|| store.get("gradebook-icons-v1", &key).unwrap().is_some()).await;
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_offline_page() {
    let (worker, _, network) = setup();
    worker.install().await.unwrap();
    network.set_offline(true);

    let response = worker
      .handle_fetch(&FetchRequest::navigate(url("/grades")))
      .await
      .unwrap();
    assert_eq!(response.body, b"offline");
  }

  #[tokio::test]
  async fn test_app_version_moves_future_writes_only() {
    let (worker, store, network) = setup();
    worker.install().await.unwrap();
    let grades = FetchRequest::get(url("/api/grades"));
    network.respond(grades.url.as_str(), FetchResponse::new(200, "[]"));

    worker.handle_fetch(&grades).await.unwrap();
    let key = grades.cache_key();
    wait_until(|| store.get("gradebook-api-v1", &key).unwrap().is_some()).await;

    worker
      .handle_message_json(r#"{"type":"APP_VERSION","version":"2.0.0"}"#)
      .unwrap();
    assert_eq!(worker.names().name(BucketKind::Api), "gradebook-api-2.0.0");

    worker.handle_fetch(&grades).await.unwrap();
    wait_until(|| store.get("gradebook-api-2.0.0", &key).unwrap().is_some()).await;

    // The old bucket is not renamed
    assert!(store.get("gradebook-api-v1", &key).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_clean_caches_deletes_everything_and_broadcasts() {
    let (worker, store, _) = setup();
    worker.install().await.unwrap();
    store.open("someone-else-v0").unwrap();
    let mut tab = worker.subscribe();

    worker.handle_message(ClientMessage::CleanCaches {
      version: "2.0.0".to_string(),
    });

    assert!(store.bucket_names().unwrap().is_empty());
    match tab.try_recv().unwrap() {
      WorkerMessage::CachesCleaned { version, timestamp } => {
        assert_eq!(version, "2.0.0");
        assert!(timestamp > 0);
      }
    }
  }

  #[tokio::test]
  async fn test_clean_caches_force_activates_waiting_worker() {
    let (worker, _, _) = setup();
    worker.set_state(WorkerState::Waiting);

    worker.handle_message(ClientMessage::CleanCaches {
      version: "1".to_string(),
    });
    assert_eq!(worker.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_superseded_worker_stops_intercepting() {
    let (worker, store, network) = setup();
    worker.install().await.unwrap();
    worker.supersede();
    assert_eq!(worker.state(), WorkerState::Redundant);

    network.set_offline(true);
    let offline_nav = worker
      .handle_fetch(&FetchRequest::navigate(url("/grades")))
      .await;
    assert!(offline_nav.is_err());
    assert!(!store.bucket_names().unwrap().is_empty());
  }

  #[test]
  fn test_bad_message_rejected() {
    let (worker, _, _) = setup();
    assert!(worker.handle_message_json("not json").is_err());
    assert!(worker
      .handle_message_json(r#"{"type":"UNKNOWN"}"#)
      .is_err());
  }
}
