//! Wires the worker, offline manager, health monitor and API client
//! together for one configuration.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::api::ApiClient;
use crate::cache::CacheStore;
use crate::config::Config;
use crate::health::{HealthMonitor, HttpProbe, RoutePolicy};
use crate::offline::OfflineManager;
use crate::worker::{HttpFetcher, WorkerController};

/// How long the worker waits on the network before giving up on a request.
const NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

pub type Worker<S> = WorkerController<S, HttpFetcher>;

pub struct Services<S: CacheStore> {
  pub config: Config,
  pub worker: Arc<Worker<S>>,
  pub offline: Arc<OfflineManager>,
  pub api: Arc<ApiClient<Worker<S>>>,
  pub monitor: Arc<HealthMonitor<HttpProbe>>,
}

impl<S: CacheStore> Services<S> {
  pub fn new(config: Config, store: Arc<S>) -> Result<Self> {
    let origin = config.origin_url()?;
    let base_url = config.base_url()?;

    let network = Arc::new(HttpFetcher::new(NETWORK_TIMEOUT)?);
    let worker = Arc::new(WorkerController::new(
      &config.cache,
      origin.clone(),
      store,
      network,
    )?);

    let api_marker = config.cache.api_prefixes.first().cloned().unwrap_or_default();
    let offline = Arc::new(OfflineManager::new(api_marker));
    let api = Arc::new(ApiClient::new(
      Arc::clone(&worker),
      origin,
      base_url,
      Arc::clone(&offline),
    ));

    let probe = HttpProbe::new(config.health_url()?, config.health.timeout())?;
    let monitor = Arc::new(HealthMonitor::new(probe, config.health.clone()));

    Ok(Self {
      config,
      worker,
      offline,
      api,
      monitor,
    })
  }

  pub fn route_policy(&self) -> RoutePolicy {
    RoutePolicy::new(self.config.routes.clone())
  }
}
