//! Backend health monitoring for protected routes.

mod monitor;
mod probe;
mod routes;

pub use monitor::{HealthCheckResult, HealthMonitor, HealthState};
pub use probe::{HealthProbe, HttpProbe, ProbeResult};
pub use routes::{RouteAction, RouteGuard, RoutePolicy};

#[cfg(test)]
pub use probe::testing;
