//! Single health-endpoint requests.

use color_eyre::Result;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::cache::FetchRequest;
use crate::worker::{FetchError, Fetcher, HttpFetcher};

/// What one probe observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
  /// The endpoint answered with this status
  Status(u16),
  /// No response at all
  Unreachable(String),
  TimedOut,
}

/// Something that can ask the backend whether it is alive.
pub trait HealthProbe: Send + Sync + 'static {
  fn check(&self) -> impl Future<Output = ProbeResult> + Send;
}

/// Probe that GETs the health endpoint over HTTP.
pub struct HttpProbe {
  fetcher: HttpFetcher,
  url: Url,
}

impl HttpProbe {
  pub fn new(url: Url, timeout: Duration) -> Result<Self> {
    Ok(Self {
      fetcher: HttpFetcher::new(timeout)?,
      url,
    })
  }

  pub fn url(&self) -> &Url {
    &self.url
  }
}

impl HealthProbe for HttpProbe {
  async fn check(&self) -> ProbeResult {
    let request = FetchRequest::get(self.url.clone()).with_header("cache-control", "no-cache");
    match self.fetcher.fetch(&request).await {
      Ok(response) => ProbeResult::Status(response.status),
      Err(FetchError::Timeout { .. }) => ProbeResult::TimedOut,
      Err(e) => ProbeResult::Unreachable(e.to_string()),
    }
  }
}
