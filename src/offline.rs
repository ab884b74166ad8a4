//! Page-side offline detection.
//!
//! The [`OfflineManager`] watches the outcome of every API request and keeps
//! two independent flags: the network is unreachable, or our backend is.
//! One instance is created at startup and shared by `Arc` with everything that
//! reports or observes request outcomes.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Failures of the same kind needed before a flag is raised.
pub const FAILURE_THRESHOLD: u32 = 2;

/// Handle returned by `add_*listener`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// What a failed request looked like, as far as classification cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
  pub url: String,
  /// HTTP status, or `None` when no response arrived at all
  pub status: Option<u16>,
}

impl RequestFailure {
  pub fn no_response(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      status: None,
    }
  }

  pub fn with_status(url: impl Into<String>, status: u16) -> Self {
    Self {
      url: url.into(),
      status: Some(status),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounters {
  pub network_failure_count: u32,
  pub backend_failure_count: u32,
  pub last_failure_time: Option<DateTime<Utc>>,
}

/// Flags plus counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfflineSnapshot {
  pub network_offline: bool,
  pub backend_offline: bool,
  pub counters: FailureCounters,
}

#[derive(Default)]
struct Inner {
  snapshot: OfflineSnapshot,
  listeners: Vec<(ListenerId, Listener)>,
  backend_listeners: Vec<(ListenerId, Listener)>,
}

pub struct OfflineManager {
  inner: Mutex<Inner>,
  next_id: AtomicU64,
  /// Substring identifying API URLs
  api_marker: String,
}

impl OfflineManager {
  pub fn new(api_marker: impl Into<String>) -> Self {
    Self {
      inner: Mutex::new(Inner::default()),
      next_id: AtomicU64::new(0),
      api_marker: api_marker.into(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn next_id(&self) -> ListenerId {
    ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
  }

  pub fn snapshot(&self) -> OfflineSnapshot {
    self.lock().snapshot
  }

  pub fn is_offline(&self) -> bool {
    self.lock().snapshot.network_offline
  }

  pub fn is_backend_offline(&self) -> bool {
    self.lock().snapshot.backend_offline
  }

  /// Subscribe to network-offline changes. The listener is called right away
  /// with the current value.
  pub fn add_listener<F>(&self, listener: F) -> ListenerId
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    let id = self.next_id();
    let listener: Listener = Arc::new(listener);
    let current = {
      let mut inner = self.lock();
      inner.listeners.push((id, Arc::clone(&listener)));
      inner.snapshot.network_offline
    };
    listener(current);
    id
  }

  pub fn remove_listener(&self, id: ListenerId) {
    self.lock().listeners.retain(|(lid, _)| *lid != id);
  }

  /// Subscribe to backend-offline changes. The listener is called right away
  /// with the current value.
  pub fn add_backend_listener<F>(&self, listener: F) -> ListenerId
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    let id = self.next_id();
    let listener: Listener = Arc::new(listener);
    let current = {
      let mut inner = self.lock();
      inner.backend_listeners.push((id, Arc::clone(&listener)));
      inner.snapshot.backend_offline
    };
    listener(current);
    id
  }

  pub fn remove_backend_listener(&self, id: ListenerId) {
    self.lock().backend_listeners.retain(|(lid, _)| *lid != id);
  }

  /// Set the network flag; listeners hear only about actual changes.
  pub fn set_offline_state(&self, offline: bool) {
    let listeners = {
      let mut inner = self.lock();
      if inner.snapshot.network_offline == offline {
        return;
      }
      inner.snapshot.network_offline = offline;
      collect(&inner.listeners)
    };
    info!(offline, "network state changed");
    notify(&listeners, offline);
  }

  /// Set the backend flag; listeners hear only about actual changes.
  pub fn set_backend_offline_state(&self, offline: bool) {
    let listeners = {
      let mut inner = self.lock();
      if inner.snapshot.backend_offline == offline {
        return;
      }
      inner.snapshot.backend_offline = offline;
      collect(&inner.backend_listeners)
    };
    info!(offline, "backend state changed");
    notify(&listeners, offline);
  }

  fn is_api_url(&self, url: &str) -> bool {
    !self.api_marker.is_empty() && url.contains(self.api_marker.as_str())
  }

  /// Classify a failed request and update the flags.
  ///
  /// - No response: counts a network failure. For API URLs the second one
  ///   means the backend is down; for anything else the network is.
  /// - 5xx: counts a backend failure; the second one means the backend is down.
  /// - 4xx: the server answered, so both counters start over.
  pub fn handle_request_failure(&self, failure: &RequestFailure) {
    enum Verdict {
      None,
      NetworkOffline,
      BackendOffline,
    }

    let verdict = {
      let mut inner = self.lock();
      let counters = &mut inner.snapshot.counters;

      match failure.status {
        None => {
          counters.network_failure_count += 1;
          counters.last_failure_time = Some(Utc::now());
          if self.is_api_url(&failure.url) {
            if counters.network_failure_count >= FAILURE_THRESHOLD {
              counters.network_failure_count = 0;
              Verdict::BackendOffline
            } else {
              Verdict::None
            }
          } else {
            Verdict::NetworkOffline
          }
        }
        Some(status) if status >= 500 => {
          counters.backend_failure_count += 1;
          counters.last_failure_time = Some(Utc::now());
          if counters.backend_failure_count >= FAILURE_THRESHOLD {
            Verdict::BackendOffline
          } else {
            Verdict::None
          }
        }
        Some(status) if (400..500).contains(&status) => {
          counters.network_failure_count = 0;
          counters.backend_failure_count = 0;
          Verdict::None
        }
        Some(_) => Verdict::None,
      }
    };

    debug!(url = %failure.url, status = ?failure.status, "request failed");

    match verdict {
      Verdict::None => {}
      Verdict::NetworkOffline => {
        self.set_offline_state(true);
        self.set_backend_offline_state(false);
      }
      Verdict::BackendOffline => {
        self.set_backend_offline_state(true);
        self.set_offline_state(false);
      }
    }
  }

  /// Any success clears both counters and both flags.
  pub fn handle_request_success(&self) {
    {
      let mut inner = self.lock();
      inner.snapshot.counters.network_failure_count = 0;
      inner.snapshot.counters.backend_failure_count = 0;
    }
    self.set_offline_state(false);
    self.set_backend_offline_state(false);
  }

  /// The network flag, or enough unclassified network failures to suspect it.
  pub fn should_be_offline(&self) -> bool {
    let snapshot = self.snapshot();
    snapshot.network_offline || snapshot.counters.network_failure_count >= FAILURE_THRESHOLD
  }

  /// Manual retry: behaves like a successful request.
  pub fn reset(&self) {
    info!("offline state reset");
    self.handle_request_success();
  }
}

fn collect(listeners: &[(ListenerId, Listener)]) -> Vec<Listener> {
  listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
}

fn notify(listeners: &[Listener], value: bool) {
  for listener in listeners {
    listener(value);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  fn manager() -> OfflineManager {
    OfflineManager::new("/api/")
  }

  /// Listener that records every value it is called with.
  fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl Fn(bool) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |v| sink.lock().unwrap().push(v))
  }

  const API: &str = "http://localhost:5000/api/grades";
  const PAGE: &str = "http://localhost:3000/static/js/bundle.js";

  #[test]
  fn test_two_api_network_failures_mean_backend_offline() {
    let m = manager();
    m.handle_request_failure(&RequestFailure::no_response(API));
    assert!(!m.is_backend_offline());
    assert_eq!(m.snapshot().counters.network_failure_count, 1);

    m.handle_request_failure(&RequestFailure::no_response(API));
    assert!(m.is_backend_offline());
    assert!(!m.is_offline());
    assert_eq!(m.snapshot().counters.network_failure_count, 0);
  }

  #[test]
  fn test_non_api_network_failures_mean_network_offline() {
    let m = manager();
    m.handle_request_failure(&RequestFailure::no_response(PAGE));
    m.handle_request_failure(&RequestFailure::no_response(PAGE));
    assert!(m.is_offline());
    assert!(!m.is_backend_offline());
    assert!(m.should_be_offline());
  }

  #[test]
  fn test_two_server_errors_mean_backend_offline() {
    let m = manager();
    m.handle_request_failure(&RequestFailure::with_status(API, 503));
    assert!(!m.is_backend_offline());
    m.handle_request_failure(&RequestFailure::with_status(API, 503));
    assert!(m.is_backend_offline());
    assert!(!m.is_offline());
  }

  #[test]
  fn test_success_between_server_errors_prevents_flag() {
    let m = manager();
    m.handle_request_failure(&RequestFailure::with_status(API, 500));
    m.handle_request_success();
    m.handle_request_failure(&RequestFailure::with_status(API, 502));
    assert!(!m.is_backend_offline());
    assert_eq!(m.snapshot().counters.backend_failure_count, 1);
  }

  #[test]
  fn test_client_errors_reset_counters_only() {
    let m = manager();
    m.handle_request_failure(&RequestFailure::with_status(API, 500));
    m.handle_request_failure(&RequestFailure::no_response(API));
    m.handle_request_failure(&RequestFailure::with_status(API, 404));

    let snapshot = m.snapshot();
    assert_eq!(snapshot.counters.network_failure_count, 0);
    assert_eq!(snapshot.counters.backend_failure_count, 0);
    assert!(snapshot.counters.last_failure_time.is_some());
    assert!(!snapshot.backend_offline);
  }

  #[test]
  fn test_client_error_does_not_clear_flags() {
    let m = manager();
    m.set_backend_offline_state(true);
    m.handle_request_failure(&RequestFailure::with_status(API, 401));
    assert!(m.is_backend_offline());
  }

  #[test]
  fn test_success_clears_everything_after_any_sequence() {
    let sequences: Vec<Vec<RequestFailure>> = vec![
      vec![RequestFailure::no_response(PAGE)],
      vec![
        RequestFailure::no_response(API),
        RequestFailure::no_response(API),
        RequestFailure::no_response(API),
      ],
      vec![
        RequestFailure::with_status(API, 500),
        RequestFailure::with_status(API, 503),
        RequestFailure::no_response(PAGE),
      ],
    ];

    for failures in sequences {
      let m = manager();
      for failure in &failures {
        m.handle_request_failure(failure);
      }
      m.handle_request_success();

      let snapshot = m.snapshot();
      assert!(!snapshot.network_offline);
      assert!(!snapshot.backend_offline);
      assert_eq!(snapshot.counters.network_failure_count, 0);
      assert_eq!(snapshot.counters.backend_failure_count, 0);
    }
  }

  #[test]
  fn test_late_listener_gets_current_state() {
    let m = manager();
    m.set_offline_state(true);

    let (seen, listener) = recorder();
    m.add_listener(listener);
    assert_eq!(*seen.lock().unwrap(), vec![true]);
  }

  #[test]
  fn test_listeners_only_hear_transitions() {
    let m = manager();
    let (seen, listener) = recorder();
    let (backend_seen, backend_listener) = recorder();
    m.add_listener(listener);
    m.add_backend_listener(backend_listener);

    m.set_offline_state(true);
    m.set_offline_state(true);
    m.set_offline_state(false);
    m.set_backend_offline_state(false);

    assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
    assert_eq!(*backend_seen.lock().unwrap(), vec![false]);
  }

  #[test]
  fn test_removed_listener_is_silent() {
    let m = manager();
    let (seen, listener) = recorder();
    let id = m.add_backend_listener(listener);
    m.remove_backend_listener(id);

    m.set_backend_offline_state(true);
    assert_eq!(*seen.lock().unwrap(), vec![false]);
  }

  #[test]
  fn test_listener_may_read_state_reentrantly() {
    let m = Arc::new(manager());
    let observed = Arc::new(Mutex::new(None));
    let (m2, sink) = (Arc::clone(&m), Arc::clone(&observed));
    m.add_listener(move |_| {
      *sink.lock().unwrap() = Some(m2.snapshot().network_offline);
    });

    m.set_offline_state(true);
    assert_eq!(*observed.lock().unwrap(), Some(true));
  }

  #[test]
  fn test_reset_acts_like_success() {
    let m = manager();
    m.handle_request_failure(&RequestFailure::no_response(PAGE));
    assert!(m.is_offline());
    m.reset();
    assert!(!m.is_offline());
    assert!(!m.should_be_offline());
  }
}
