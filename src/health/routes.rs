//! Which routes get health-gated, and what happens on navigation.

use std::sync::Arc;
use tracing::debug;

use super::monitor::{HealthMonitor, HealthState};
use super::probe::HealthProbe;
use crate::config::RoutesConfig;

/// Route lists from config, with the matching rules applied.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
  routes: RoutesConfig,
}

impl RoutePolicy {
  pub fn new(routes: RoutesConfig) -> Self {
    Self { routes }
  }

  pub fn default_route(&self) -> &str {
    &self.routes.default_route
  }

  pub fn maintenance_route(&self) -> &str {
    &self.routes.maintenance_route
  }

  /// Public routes match exactly and are never monitored. Protected routes
  /// match on a path-segment prefix, so `/grades/42` is covered by `/grades`
  /// but `/gradesheet` is not.
  pub fn should_check_health(&self, path: &str) -> bool {
    let path = route_path(path);
    if self.routes.public.iter().any(|p| p == path) {
      return false;
    }
    self.routes.protected.iter().any(|prefix| has_segment_prefix(path, prefix))
  }
}

/// Drop any query string or fragment.
pub fn route_path(path: &str) -> &str {
  path.split(['?', '#']).next().unwrap_or(path)
}

fn has_segment_prefix(path: &str, prefix: &str) -> bool {
  let prefix = prefix.trim_end_matches('/');
  match path.strip_prefix(prefix) {
    Some(rest) => rest.is_empty() || rest.starts_with('/'),
    None => false,
  }
}

/// What the caller should do after a route change or health update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
  Stay,
  /// Navigate to this route instead
  Redirect(String),
}

/// Starts and stops health monitoring as the user moves between routes.
pub struct RouteGuard<P: HealthProbe> {
  policy: RoutePolicy,
  monitor: Arc<HealthMonitor<P>>,
  current: Option<String>,
}

impl<P: HealthProbe> RouteGuard<P> {
  pub fn new(policy: RoutePolicy, monitor: Arc<HealthMonitor<P>>) -> Self {
    Self {
      policy,
      monitor,
      current: None,
    }
  }

  pub fn current(&self) -> Option<&str> {
    self.current.as_deref()
  }

  pub fn monitor(&self) -> &Arc<HealthMonitor<P>> {
    &self.monitor
  }

  /// Whether the current route is health-gated.
  pub fn is_monitored(&self) -> bool {
    self.current.as_deref().is_some_and(|p| self.policy.should_check_health(p))
  }

  /// Record a route change and start or stop monitoring to match it.
  ///
  /// The maintenance route is not gated but keeps polling, so that a
  /// recovered backend sends the user back through [`Self::on_health`].
  pub fn navigate(&mut self, path: &str) -> RouteAction {
    let path = route_path(path).to_string();
    let monitored = self.policy.should_check_health(&path);
    let polling = monitored || path == self.policy.maintenance_route();
    debug!(route = %path, monitored, polling, "navigated");
    self.current = Some(path);

    if polling {
      self.monitor.start_monitoring();
    } else {
      self.monitor.stop_monitoring();
    }
    self.on_health(&self.monitor.state())
  }

  /// Leave the maintenance screen once a check has found the backend healthy.
  pub fn on_health(&self, state: &HealthState) -> RouteAction {
    let on_maintenance = self.current.as_deref() == Some(self.policy.maintenance_route());
    if on_maintenance && state.online && state.last_check_time.is_some() {
      RouteAction::Redirect(self.policy.default_route().to_string())
    } else {
      RouteAction::Stay
    }
  }
}

impl<P: HealthProbe> Drop for RouteGuard<P> {
  fn drop(&mut self) {
    self.monitor.stop_monitoring();
  }
}
