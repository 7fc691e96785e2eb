//! Per-route breaker state machine.
//!
//! ```text
//!  Closed --(failures >= threshold)--> Open
//!  Open --(break elapsed, next admission)--> HalfOpen
//!  HalfOpen --(trial ok)--> Closed
//!  HalfOpen --(trial failed)--> Open (timer restarts)
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// A state change caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The circuit opened (from Closed or after a failed trial).
    Opened,
    /// A successful trial closed the circuit.
    Closed,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Breaker for a single route.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    duration_of_break: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker. A `threshold` of 0 is treated as 1.
    #[must_use]
    pub fn new(threshold: u32, duration_of_break: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            duration_of_break,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Current state. An open breaker whose break has elapsed still reports
    /// `Open` until the next admission attempt moves it to `HalfOpen`.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Asks to run one call. Returns `None` if the call must be rejected.
    ///
    /// Once the break has elapsed, the first caller gets the single trial
    /// permit and everyone else is rejected until the trial settles.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut inner = self.inner.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.duration_of_break);
                if !elapsed {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return None;
                }
                inner.trial_in_flight = true;
                true
            }
        };
        drop(inner);

        Some(Permit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) -> Option<Transition> {
        let mut inner = self.inner.lock();
        if trial {
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            inner.trial_in_flight = false;
            return Some(Transition::Closed);
        }
        if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
        None
    }

    fn on_failure(&self, trial: bool) -> Option<Transition> {
        let mut inner = self.inner.lock();
        if trial {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_in_flight = false;
            return Some(Transition::Opened);
        }
        // Outcomes of calls admitted before the circuit opened do not move it.
        if inner.state != CircuitState::Closed {
            return None;
        }
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            return Some(Transition::Opened);
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Permit
// ---------------------------------------------------------------------------

/// Admission for one call. Must be settled with [`Permit::success`],
/// [`Permit::failure`] or [`Permit::release`].
///
/// A trial permit dropped without being settled (the caller was cancelled)
/// counts as a failed trial so the circuit never stays half-open forever.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl Permit {
    /// `true` if this is the single half-open trial call.
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) -> Option<Transition> {
        self.settled = true;
        self.breaker.on_success(self.trial)
    }

    pub fn failure(mut self) -> Option<Transition> {
        self.settled = true;
        self.breaker.on_failure(self.trial)
    }

    /// Settles a call whose outcome says nothing about the remote's health.
    ///
    /// A trial released this way still closes the circuit: the remote answered.
    pub fn release(mut self) -> Option<Transition> {
        self.settled = true;
        if self.trial {
            self.breaker.on_success(true)
        } else {
            None
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_failure(true);
        }
    }
}
