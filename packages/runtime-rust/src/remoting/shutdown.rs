//! Server lifecycle state and in-flight call tracking for graceful drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};

/// Lifecycle of a remoting server: Starting -> Serving -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Bound but not yet accepting.
    Starting,
    Serving,
    /// No new connections; in-flight calls are finishing.
    Draining,
    Stopped,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    idle: Notify,
}

/// Coordinates shutdown between the accept loop, connection tasks and the
/// node that owns the server.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    in_flight: Arc<InFlight>,
    state: ArcSwap<ServerState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            signal,
            in_flight: Arc::new(InFlight::default()),
            state: ArcSwap::from_pointee(ServerState::Starting),
        }
    }

    pub fn set_serving(&self) {
        self.state.store(Arc::new(ServerState::Serving));
    }

    /// Final transition once every connection has been closed.
    pub fn set_stopped(&self) {
        self.state.store(Arc::new(ServerState::Stopped));
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        **self.state.load()
    }

    /// Receiver that flips to `true` once shutdown is triggered.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Moves to `Draining` and wakes every subscriber.
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(ServerState::Draining));
        self.signal.send_replace(true);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.signal.borrow()
    }

    /// Counts one in-flight call until the guard is dropped, including when
    /// the call panics.
    #[must_use]
    pub fn track_call(&self) -> CallGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        CallGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits until no call is in flight, at most `grace`.
    ///
    /// Returns `true` and moves to `Stopped` when drained. On timeout returns
    /// `false` and stays `Draining`.
    pub async fn wait_for_drain(&self, grace: Duration) -> bool {
        let drained = tokio::time::timeout(grace, async {
            loop {
                let idle = self.in_flight.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.state.store(Arc::new(ServerState::Stopped));
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop.
#[derive(Debug)]
pub struct CallGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}
