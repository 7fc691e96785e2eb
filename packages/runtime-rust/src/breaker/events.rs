//! Hooks fired on breaker transitions and attempts.

use std::time::Duration;

use courier_core::RemotingStatus;
use tracing::{debug, info, warn};

/// Observer for breaker activity.
///
/// Every hook has a tracing-backed default, so implementors only override
/// what they care about.
pub trait CircuitBreakerEvents: Send + Sync {
    fn on_break(&self, route: &str, failures: u32, duration_of_break: Duration) {
        warn!(
            route,
            failures,
            break_ms = u64::try_from(duration_of_break.as_millis()).unwrap_or(u64::MAX),
            "circuit opened"
        );
    }

    fn on_half_open(&self, route: &str) {
        info!(route, "circuit half-open, admitting trial call");
    }

    fn on_reset(&self, route: &str) {
        info!(route, "circuit closed");
    }

    fn on_rejected(&self, route: &str) {
        debug!(route, "call rejected by open circuit");
    }

    fn on_timeout(&self, route: &str, timeout: Duration) {
        debug!(
            route,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "attempt timed out"
        );
    }

    fn on_retry(&self, route: &str, attempt: u32, status: RemotingStatus) {
        debug!(route, attempt, ?status, "retrying failed attempt");
    }
}

/// Default observer: logs through `tracing` and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl CircuitBreakerEvents for TracingEvents {}
