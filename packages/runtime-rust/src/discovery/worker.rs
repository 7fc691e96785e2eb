//! Background worker for periodic and on-demand tasks.
//!
//! `BackgroundWorker<R>` feeds tasks from an mpsc channel to a
//! `BackgroundRunnable` and calls its tick hook at a fixed interval.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::warn;

const TASK_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Task handler executed by [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    /// Called once per tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker stops. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Runs one `BackgroundRunnable` on its own tokio task.
///
/// Tasks and ticks are handled one at a time, so the runnable never sees
/// concurrent calls.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker. `tick` of `None` or zero disables ticking.
    ///
    /// The first tick fires one full interval after start.
    pub fn start(mut runnable: R, tick: Option<Duration>) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let mut ticker = tick.filter(|d| !d.is_zero()).map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let handle = tokio::spawn(async move {
            loop {
                // Queued tasks are drained before a stop request is honoured.
                tokio::select! {
                    biased;
                    task = rx.recv() => match task {
                        Some(task) => runnable.run(task).await,
                        None => break,
                    },
                    _ = &mut shutdown_rx => break,
                    () = next_tick(&mut ticker) => runnable.on_tick().await,
                }
            }
            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Queues a task for the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the worker and waits for it to finish.
    pub async fn stop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Like [`stop`](Self::stop) but waits at most `grace`; a worker still
    /// busy after that is aborted.
    ///
    /// Returns `true` if the worker stopped on its own.
    pub async fn stop_with_grace(&mut self, grace: Duration) -> bool {
        self.signal_stop();
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let abort = handle.abort_handle();
        if tokio::time::timeout(grace, handle).await.is_ok() {
            true
        } else {
            warn!(grace_ms = grace.as_millis(), "background worker did not stop in time, aborting");
            abort.abort();
            false
        }
    }

    fn signal_stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
    }
}

impl<R: BackgroundRunnable> Drop for BackgroundWorker<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
