//! Periodic backend health checks.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::probe::{HealthProbe, ProbeResult};
use crate::config::HealthConfig;

/// Status code the health endpoint answers with when all is well.
const HEALTHY_STATUS: u16 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthState {
  pub online: bool,
  pub last_check_time: Option<DateTime<Utc>>,
  /// Consecutive failed checks
  pub error_count: u32,
  /// A check is in flight
  pub checking: bool,
}

impl Default for HealthState {
  fn default() -> Self {
    Self {
      online: true,
      last_check_time: None,
      error_count: 0,
      checking: false,
    }
  }
}

/// Outcome of one conclusive check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckResult {
  pub online: bool,
  pub timestamp: DateTime<Utc>,
  pub error_count: u32,
}

/// Polls the backend health endpoint and publishes a [`HealthState`].
///
/// At most one check runs at a time. Monitoring is started and stopped
/// explicitly, usually by a [`RouteGuard`](super::RouteGuard).
pub struct HealthMonitor<P: HealthProbe> {
  probe: P,
  settings: HealthConfig,
  state: watch::Sender<HealthState>,
  checking: AtomicBool,
  task: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the in-flight marker however the check ends, including when the
/// polling task is aborted mid-check.
struct CheckGuard<'a> {
  checking: &'a AtomicBool,
  state: &'a watch::Sender<HealthState>,
}

impl Drop for CheckGuard<'_> {
  fn drop(&mut self) {
    self.checking.store(false, Ordering::SeqCst);
    self.state.send_if_modified(|s| std::mem::replace(&mut s.checking, false));
  }
}

impl<P: HealthProbe> HealthMonitor<P> {
  pub fn new(probe: P, settings: HealthConfig) -> Self {
    let (state, _) = watch::channel(HealthState::default());
    Self {
      probe,
      settings,
      state,
      checking: AtomicBool::new(false),
      task: Mutex::new(None),
    }
  }

  pub fn state(&self) -> HealthState {
    self.state.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<HealthState> {
    self.state.subscribe()
  }

  pub fn probe(&self) -> &P {
    &self.probe
  }

  pub fn is_monitoring(&self) -> bool {
    self
      .task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .is_some_and(|task| !task.is_finished())
  }

  /// Run one check.
  ///
  /// Returns `None` when another check is already in flight, or when the
  /// probe timed out and timeouts are configured as inconclusive. In both
  /// cases the published state is left alone.
  pub async fn perform_health_check(&self) -> Option<HealthCheckResult> {
    if self.checking.swap(true, Ordering::SeqCst) {
      debug!("health check already in flight, skipping");
      return None;
    }
    let _guard = CheckGuard {
      checking: &self.checking,
      state: &self.state,
    };
    self.state.send_modify(|s| s.checking = true);

    let outcome = tokio::time::timeout(self.settings.timeout(), self.probe.check())
      .await
      .unwrap_or(ProbeResult::TimedOut);

    let healthy = match outcome {
      ProbeResult::Status(HEALTHY_STATUS) => true,
      ProbeResult::Status(status) => {
        warn!(status, "backend health check failed");
        false
      }
      ProbeResult::Unreachable(reason) => {
        warn!(%reason, "backend health endpoint unreachable");
        false
      }
      ProbeResult::TimedOut if self.settings.timeout_counts_as_failure => {
        warn!("backend health check timed out");
        false
      }
      ProbeResult::TimedOut => {
        warn!("backend health check timed out, keeping previous state");
        return None;
      }
    };

    let threshold = self.settings.failure_threshold.max(1);
    let timestamp = Utc::now();
    let mut went = None;
    let mut result = None;
    self.state.send_modify(|s| {
      let was_online = s.online;
      s.last_check_time = Some(timestamp);
      if healthy {
        s.online = true;
        s.error_count = 0;
      } else {
        s.error_count += 1;
        if s.error_count >= threshold {
          s.online = false;
        }
      }
      if was_online != s.online {
        went = Some(s.online);
      }
      result = Some(HealthCheckResult {
        online: s.online,
        timestamp,
        error_count: s.error_count,
      });
    });

    match went {
      Some(true) => info!("backend is back online"),
      Some(false) => warn!("backend is offline"),
      None => {}
    }
    result
  }

  /// Check now, then every poll interval until stopped. Calling this while
  /// already monitoring does nothing.
  pub fn start_monitoring(self: &Arc<Self>) {
    let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
    if task.as_ref().is_some_and(|t| !t.is_finished()) {
      return;
    }

    let monitor = Arc::downgrade(self);
    let interval = self.settings.poll_interval();
    *task = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let Some(monitor) = monitor.upgrade() else {
          break;
        };
        monitor.perform_health_check().await;
      }
    }));
    info!(interval_ms = self.settings.poll_interval_ms, "health monitoring started");
  }

  /// Stop polling. Safe to call when not monitoring.
  pub fn stop_monitoring(&self) {
    let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(task) = task {
      task.abort();
      info!("health monitoring stopped");
    }
  }
}

impl<P: HealthProbe> Drop for HealthMonitor<P> {
  fn drop(&mut self) {
    self.stop_monitoring();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::health::probe::testing::ScriptedProbe;
  use std::time::Duration;

  fn settings() -> HealthConfig {
    HealthConfig {
      poll_interval_ms: 5_000,
      timeout_ms: 3_000,
      ..HealthConfig::default()
    }
  }

  fn monitor(replies: Vec<ProbeResult>, settings: HealthConfig) -> Arc<HealthMonitor<ScriptedProbe>> {
    Arc::new(HealthMonitor::new(ScriptedProbe::new(replies), settings))
  }

  #[tokio::test]
  async fn test_starts_online_and_unchecked() {
    let m = monitor(vec![], settings());
    let state = m.state();
    assert!(state.online);
    assert_eq!(state.error_count, 0);
    assert!(state.last_check_time.is_none());
    assert!(!state.checking);
  }

  #[tokio::test]
  async fn test_failed_check_takes_backend_offline() {
    let m = monitor(vec![ProbeResult::Status(503)], settings());

    let result = m.perform_health_check().await.unwrap();
    assert!(!result.online);
    assert_eq!(result.error_count, 1);

    let state = m.state();
    assert!(!state.online);
    assert_eq!(state.last_check_time, Some(result.timestamp));
    assert!(!state.checking);
  }

  #[tokio::test]
  async fn test_success_resets_error_count() {
    let m = monitor(
      vec![
        ProbeResult::Unreachable("refused".into()),
        ProbeResult::Status(500),
        ProbeResult::Status(200),
      ],
      settings(),
    );

    m.perform_health_check().await;
    let second = m.perform_health_check().await.unwrap();
    assert_eq!(second.error_count, 2);

    let third = m.perform_health_check().await.unwrap();
    assert!(third.online);
    assert_eq!(third.error_count, 0);
  }

  #[tokio::test]
  async fn test_non_200_success_status_is_unhealthy() {
    let m = monitor(vec![ProbeResult::Status(204)], settings());
    assert!(!m.perform_health_check().await.unwrap().online);
  }

  #[tokio::test]
  async fn test_failure_threshold_delays_offline() {
    let m = monitor(
      vec![ProbeResult::Status(500)],
      HealthConfig {
        failure_threshold: 3,
        ..settings()
      },
    );

    assert!(m.perform_health_check().await.unwrap().online);
    assert!(m.perform_health_check().await.unwrap().online);
    let third = m.perform_health_check().await.unwrap();
    assert!(!third.online);
    assert_eq!(third.error_count, 3);
  }

  #[tokio::test]
  async fn test_timeout_is_inconclusive_by_default() {
    let m = monitor(vec![ProbeResult::TimedOut], settings());
    assert!(m.perform_health_check().await.is_none());

    let state = m.state();
    assert!(state.online);
    assert_eq!(state.error_count, 0);
    assert!(state.last_check_time.is_none());
    assert!(!state.checking);
  }

  #[tokio::test]
  async fn test_timeout_can_count_as_failure() {
    let m = monitor(
      vec![ProbeResult::TimedOut],
      HealthConfig {
        timeout_counts_as_failure: true,
        ..settings()
      },
    );
    let result = m.perform_health_check().await.unwrap();
    assert!(!result.online);
  }

  #[tokio::test(start_paused = true)]
  async fn test_slow_probe_hits_timeout() {
    let probe = ScriptedProbe::with_delay(vec![ProbeResult::Status(200)], Duration::from_secs(10));
    let m = HealthMonitor::new(
      probe,
      HealthConfig {
        timeout_counts_as_failure: true,
        ..settings()
      },
    );
    let result = m.perform_health_check().await.unwrap();
    assert!(!result.online);
  }

  #[tokio::test(start_paused = true)]
  async fn test_overlapping_checks_are_skipped() {
    let probe = ScriptedProbe::with_delay(vec![ProbeResult::Status(200)], Duration::from_millis(500));
    let m = Arc::new(HealthMonitor::new(probe, settings()));

    let first = {
      let m = Arc::clone(&m);
      tokio::spawn(async move { m.perform_health_check().await })
    };
    tokio::task::yield_now().await;
    assert!(m.state().checking);

    assert!(m.perform_health_check().await.is_none());
    assert!(first.await.unwrap().is_some());
    assert_eq!(m.probe().calls(), 1);
    assert!(!m.state().checking);
  }

  #[tokio::test(start_paused = true)]
  async fn test_monitoring_polls_until_stopped() {
    let m = monitor(vec![ProbeResult::Status(200)], settings());

    m.start_monitoring();
    m.start_monitoring();
    assert!(m.is_monitoring());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(m.probe().calls(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(m.probe().calls(), 2);

    m.stop_monitoring();
    m.stop_monitoring();
    assert!(!m.is_monitoring());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(m.probe().calls(), 2);
  }

  #[tokio::test]
  async fn test_subscribers_see_transitions() {
    let m = monitor(vec![ProbeResult::Status(502)], settings());
    let mut rx = m.subscribe();

    m.perform_health_check().await;
    assert!(rx.has_changed().unwrap());
    assert!(!rx.borrow_and_update().online);
  }
}
