//! Decides what the user sees: the app, or a screen explaining why not.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::health::{HealthCheckResult, HealthMonitor, HealthProbe, HealthState};
use crate::offline::{OfflineManager, OfflineSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateView {
  App,
  /// The device cannot reach the network
  NetworkOffline,
  /// The network is fine but our backend is not
  Maintenance {
    error_count: u32,
    last_check: Option<DateTime<Utc>>,
  },
}

impl GateView {
  pub fn is_blocking(&self) -> bool {
    !matches!(self, GateView::App)
  }
}

/// Pick the view for the current state. A network outage wins over a
/// backend outage; health results only count on monitored routes.
pub fn evaluate(offline: &OfflineSnapshot, health: &HealthState, monitored: bool) -> GateView {
  if offline.network_offline {
    return GateView::NetworkOffline;
  }
  if offline.backend_offline || (monitored && !health.online) {
    return GateView::Maintenance {
      error_count: health.error_count.max(offline.counters.backend_failure_count),
      last_check: health.last_check_time,
    };
  }
  GateView::App
}

/// Both state sources, plus the retry action the blocking screens offer.
pub struct Gate<P: HealthProbe> {
  offline: Arc<OfflineManager>,
  monitor: Arc<HealthMonitor<P>>,
}

impl<P: HealthProbe> Gate<P> {
  pub fn new(offline: Arc<OfflineManager>, monitor: Arc<HealthMonitor<P>>) -> Self {
    Self { offline, monitor }
  }

  pub fn view(&self, monitored: bool) -> GateView {
    evaluate(&self.offline.snapshot(), &self.monitor.state(), monitored)
  }

  /// Forget recorded failures and ask the backend again right away.
  pub async fn retry(&self) -> Option<HealthCheckResult> {
    self.offline.reset();
    self.monitor.perform_health_check().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::HealthConfig;
  use crate::health::testing::ScriptedProbe;
  use crate::health::ProbeResult;

  fn unhealthy() -> HealthState {
    HealthState {
      online: false,
      error_count: 3,
      last_check_time: Some(Utc::now()),
      checking: false,
    }
  }

  #[test]
  fn test_all_clear_shows_app() {
    let view = evaluate(&OfflineSnapshot::default(), &HealthState::default(), true);
    assert_eq!(view, GateView::App);
    assert!(!view.is_blocking());
  }

  #[test]
  fn test_network_outage_wins() {
    let offline = OfflineSnapshot {
      network_offline: true,
      backend_offline: true,
      ..OfflineSnapshot::default()
    };
    assert_eq!(evaluate(&offline, &unhealthy(), true), GateView::NetworkOffline);
  }

  #[test]
  fn test_unhealthy_backend_on_monitored_route() {
    let health = unhealthy();
    assert_eq!(
      evaluate(&OfflineSnapshot::default(), &health, true),
      GateView::Maintenance {
        error_count: 3,
        last_check: health.last_check_time,
      }
    );
  }

  #[test]
  fn test_health_ignored_on_public_route() {
    assert_eq!(
      evaluate(&OfflineSnapshot::default(), &unhealthy(), false),
      GateView::App
    );
  }

  #[test]
  fn test_backend_flag_blocks_everywhere() {
    let offline = OfflineSnapshot {
      backend_offline: true,
      ..OfflineSnapshot::default()
    };
    assert!(matches!(
      evaluate(&offline, &HealthState::default(), false),
      GateView::Maintenance { .. }
    ));
  }

  #[tokio::test]
  async fn test_retry_resets_and_rechecks() {
    let offline = Arc::new(OfflineManager::new("/api/"));
    let monitor = Arc::new(HealthMonitor::new(
      ScriptedProbe::new(vec![ProbeResult::Status(500), ProbeResult::Status(200)]),
      HealthConfig::default(),
    ));
    let gate = Gate::new(Arc::clone(&offline), Arc::clone(&monitor));

    monitor.perform_health_check().await;
    offline.set_backend_offline_state(true);
    assert!(gate.view(true).is_blocking());

    let result = gate.retry().await.unwrap();
    assert!(result.online);
    assert_eq!(gate.view(true), GateView::App);
  }
}
