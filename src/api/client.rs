//! Page-side HTTP client.
//!
//! Every request a page makes goes through the worker (or any other
//! [`Fetcher`]) and its outcome is fed to the shared [`OfflineManager`].

use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

use super::error::RequestError;
use crate::cache::{FetchRequest, FetchResponse};
use crate::offline::OfflineManager;
use crate::worker::Fetcher;

pub struct ApiClient<F: Fetcher> {
  fetcher: Arc<F>,
  origin: Url,
  base_url: Url,
  offline: Arc<OfflineManager>,
}

impl<F: Fetcher> ApiClient<F> {
  /// `origin` is where the app itself is served from; `base_url` is the
  /// backend API root.
  pub fn new(fetcher: Arc<F>, origin: Url, base_url: Url, offline: Arc<OfflineManager>) -> Self {
    Self {
      fetcher,
      origin,
      base_url,
      offline,
    }
  }

  pub fn offline(&self) -> &Arc<OfflineManager> {
    &self.offline
  }

  /// Load an app route as a document. Navigations are answered by the
  /// worker, possibly with the offline page, so they say nothing about the
  /// backend and are not reported.
  #[instrument(skip(self))]
  pub async fn navigate(&self, path: &str) -> Result<FetchResponse, RequestError> {
    let url = join(&self.origin, path)?;
    let response = self.fetcher.fetch(&FetchRequest::navigate(url.clone())).await?;
    if response.is_success() {
      Ok(response)
    } else {
      Err(RequestError::Status {
        url: url.to_string(),
        status: response.status,
      })
    }
  }

  /// GET a backend resource, relative to the API root.
  pub async fn get(&self, path: &str) -> Result<FetchResponse, RequestError> {
    let url = join(&self.base_url, path)?;
    self.send(FetchRequest::get(url)).await
  }

  /// Send a request and report how it went.
  #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
  pub async fn send(&self, request: FetchRequest) -> Result<FetchResponse, RequestError> {
    let result = match self.fetcher.fetch(&request).await {
      Ok(response) if response.is_success() => Ok(response),
      Ok(response) => Err(RequestError::Status {
        url: request.url.to_string(),
        status: response.status,
      }),
      Err(e) => Err(RequestError::from(e)),
    };

    match &result {
      Ok(response) => {
        debug!(status = response.status, "request succeeded");
        self.offline.handle_request_success();
      }
      Err(e) => {
        debug!(error = %e, "request failed");
        if let Some(failure) = e.to_failure() {
          self.offline.handle_request_failure(&failure);
        }
      }
    }
    result
  }
}

fn join(base: &Url, path: &str) -> Result<Url, RequestError> {
  base.join(path).map_err(|e| RequestError::InvalidPath {
    path: path.to_string(),
    message: e.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::testing::FakeNetwork;

  const ORIGIN: &str = "https://grades.test";
  const API: &str = "https://api.grades.test";

  fn client() -> (Arc<FakeNetwork>, ApiClient<FakeNetwork>) {
    let network = Arc::new(FakeNetwork::new());
    let client = ApiClient::new(
      Arc::clone(&network),
      Url::parse(ORIGIN).unwrap(),
      Url::parse(API).unwrap(),
      Arc::new(OfflineManager::new("/api/")),
    );
    (network, client)
  }

  #[tokio::test]
  async fn test_success_clears_offline_flags() {
    let (network, client) = client();
    network.respond(
      &format!("{API}/api/grades"),
      FetchResponse::new(200, "[]"),
    );
    client.offline().set_backend_offline_state(true);

    let response = client.get("/api/grades").await.unwrap();
    assert_eq!(response.body, b"[]");
    assert!(!client.offline().is_backend_offline());
  }

  #[tokio::test]
  async fn test_two_server_errors_mark_backend_offline() {
    let (network, client) = client();
    network.respond(&format!("{API}/api/events"), FetchResponse::new(503, "down"));

    let err = client.get("/api/events").await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(!client.offline().is_backend_offline());

    client.get("/api/events").await.unwrap_err();
    assert!(client.offline().is_backend_offline());
  }

  #[tokio::test]
  async fn test_unreachable_api_marks_backend_offline() {
    let (network, client) = client();
    network.set_offline(true);

    client.get("/api/ratings").await.unwrap_err();
    client.get("/api/ratings").await.unwrap_err();
    let snapshot = client.offline().snapshot();
    assert!(snapshot.backend_offline);
    assert!(!snapshot.network_offline);
  }

  #[tokio::test]
  async fn test_unreachable_non_api_marks_network_offline() {
    let (network, client) = client();
    network.set_offline(true);

    client.get("/status.json").await.unwrap_err();
    assert!(client.offline().is_offline());
  }

  #[tokio::test]
  async fn test_client_errors_are_not_outages() {
    let (network, client) = client();
    network.respond(&format!("{API}/api/grades"), FetchResponse::new(500, ""));
    client.get("/api/grades").await.unwrap_err();

    client.get("/api/missing").await.unwrap_err();
    client.get("/api/grades").await.unwrap_err();
    assert!(!client.offline().is_backend_offline());
  }

  #[tokio::test]
  async fn test_navigation_is_not_reported() {
    let (network, client) = client();
    network.set_offline(true);

    client.navigate("/grades").await.unwrap_err();
    client.navigate("/grades").await.unwrap_err();
    assert_eq!(client.offline().snapshot().counters.network_failure_count, 0);
    assert!(!client.offline().is_offline());
  }
}
