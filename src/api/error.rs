use thiserror::Error;

use crate::offline::RequestFailure;
use crate::worker::FetchError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
  #[error("invalid request path {path}: {message}")]
  InvalidPath { path: String, message: String },

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error("{url} responded with status {status}")]
  Status { url: String, status: u16 },
}

impl RequestError {
  /// How the offline manager should see this error. Bad paths never reached
  /// the network, so they are not reported.
  pub fn to_failure(&self) -> Option<RequestFailure> {
    match self {
      RequestError::InvalidPath { .. } => None,
      RequestError::Fetch(e) => Some(RequestFailure::no_response(e.url())),
      RequestError::Status { url, status } => Some(RequestFailure::with_status(url.clone(), *status)),
    }
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      RequestError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_timeouts_report_no_status() {
    let err = RequestError::from(FetchError::Timeout {
      url: "https://api.test/api/grades".to_string(),
    });
    assert_eq!(
      err.to_failure(),
      Some(RequestFailure::no_response("https://api.test/api/grades"))
    );
  }

  #[test]
  fn test_status_errors_keep_status() {
    let err = RequestError::Status {
      url: "https://api.test/api/events".to_string(),
      status: 503,
    };
    assert_eq!(err.to_failure().unwrap().status, Some(503));
    assert_eq!(err.status(), Some(503));
  }
}
