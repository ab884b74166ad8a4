//! Loading one app route: the document navigation, then the route's API data
//! when the route is health-gated.

use futures::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::ApiClient;
use crate::cache::FetchResponse;
use crate::worker::Fetcher;

/// Route data older than this is reloaded on the next tick.
pub const PAGE_STALE_TIME: Duration = Duration::from_secs(30);

/// Lines of response body kept for display.
const PREVIEW_LINES: usize = 200;

/// What a route load produced.
#[derive(Debug, Clone)]
pub struct RoutePage {
  /// Status of the document navigation, if it got a response
  pub document_status: Option<u16>,
  /// Status and body of the route's API data, for health-gated routes
  pub data: Option<RouteData>,
}

#[derive(Debug, Clone)]
pub struct RouteData {
  pub path: String,
  pub status: u16,
  pub content_type: Option<String>,
  pub preview: String,
}

/// API path backing an app route: `/grades` reads `/api/grades`.
pub fn data_path(route: &str) -> String {
  format!("/api{}", route)
}

/// Pretty-print JSON bodies, pass anything else through as text.
pub fn preview_body(response: &FetchResponse) -> String {
  let text = match serde_json::from_slice::<serde_json::Value>(&response.body) {
    Ok(value) => serde_json::to_string_pretty(&value)
      .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).into_owned()),
    Err(_) => String::from_utf8_lossy(&response.body).into_owned(),
  };
  text.lines().take(PREVIEW_LINES).collect::<Vec<_>>().join("\n")
}

async fn fetch_page<F: Fetcher>(
  api: &ApiClient<F>,
  route: &str,
  with_data: bool,
) -> Result<RoutePage, String> {
  let document_status = match api.navigate(route).await {
    Ok(response) => Some(response.status),
    Err(e) => e.status(),
  };

  let data = if with_data {
    let path = data_path(route);
    let response = api.get(&path).await.map_err(|e| e.to_string())?;
    Some(RouteData {
      status: response.status,
      content_type: response.content_type().map(str::to_string),
      preview: preview_body(&response),
      path,
    })
  } else {
    None
  };

  Ok(RoutePage {
    document_status,
    data,
  })
}

#[derive(Debug, Clone)]
pub enum PageStatus {
  Loading,
  Ready(RoutePage),
  Failed(String),
}

/// The current route and its load in flight, if any.
pub struct PageLoad {
  route: String,
  with_data: bool,
  status: PageStatus,
  task: Option<JoinHandle<Result<RoutePage, String>>>,
  loaded_at: Option<Instant>,
}

impl PageLoad {
  /// Begin loading `route` in the background.
  pub fn start<F: Fetcher>(api: &Arc<ApiClient<F>>, route: &str, with_data: bool) -> Self {
    let mut page = Self {
      route: route.to_string(),
      with_data,
      status: PageStatus::Loading,
      task: None,
      loaded_at: None,
    };
    page.spawn(api);
    page
  }

  pub fn route(&self) -> &str {
    &self.route
  }

  pub fn status(&self) -> &PageStatus {
    &self.status
  }

  pub fn is_failed(&self) -> bool {
    matches!(self.status, PageStatus::Failed(_))
  }

  /// Loaded data older than `max_age`. Loads in flight and failures are
  /// never stale; failures wait for a retry or a reconnect.
  pub fn is_stale(&self, max_age: Duration) -> bool {
    match self.status {
      PageStatus::Ready(_) => self.loaded_at.map_or(true, |t| t.elapsed() >= max_age),
      _ => false,
    }
  }

  /// Load the same route again, abandoning any load in flight.
  pub fn reload<F: Fetcher>(&mut self, api: &Arc<ApiClient<F>>) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
    self.spawn(api);
  }

  /// Pick up a finished load. Returns `true` if the status changed.
  pub fn poll(&mut self) -> bool {
    let Some(task) = self.task.as_mut() else {
      return false;
    };
    let Some(joined) = task.now_or_never() else {
      return false;
    };
    self.task = None;

    self.status = match joined {
      Ok(Ok(page)) => {
        self.loaded_at = Some(Instant::now());
        PageStatus::Ready(page)
      }
      Ok(Err(error)) => PageStatus::Failed(error),
      Err(e) => PageStatus::Failed(format!("Load was cancelled: {}", e)),
    };
    debug!(route = %self.route, failed = self.is_failed(), "route loaded");
    true
  }

  fn spawn<F: Fetcher>(&mut self, api: &Arc<ApiClient<F>>) {
    let api = Arc::clone(api);
    let route = self.route.clone();
    let with_data = self.with_data;
    self.status = PageStatus::Loading;
    self.task = Some(tokio::spawn(async move {
      fetch_page(&api, &route, with_data).await
    }));
  }
}

impl Drop for PageLoad {
  fn drop(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}
