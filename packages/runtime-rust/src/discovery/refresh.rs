//! Periodic node health refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::worker::{BackgroundRunnable, BackgroundWorker};
use super::ServiceDiscovery;

/// On-demand work for the refresher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTask {
    Now,
}

struct RefreshRunnable {
    discovery: Arc<dyn ServiceDiscovery>,
}

impl RefreshRunnable {
    async fn refresh(&self) {
        match self.discovery.refresh().await {
            Ok(()) => debug!("node status refreshed"),
            Err(err) => warn!(error = %err, "node status refresh failed"),
        }
    }
}

#[async_trait]
impl BackgroundRunnable for RefreshRunnable {
    type Task = RefreshTask;

    async fn run(&mut self, _task: RefreshTask) {
        self.refresh().await;
    }

    async fn on_tick(&mut self) {
        self.refresh().await;
    }
}

/// The single periodic refresh task of a node.
pub struct StatusRefresher {
    worker: Option<BackgroundWorker<RefreshRunnable>>,
}

impl StatusRefresher {
    /// Starts refreshing every `interval`. A zero interval disables the
    /// refresher entirely.
    #[must_use]
    pub fn start(discovery: Arc<dyn ServiceDiscovery>, interval: Duration) -> Self {
        if interval.is_zero() {
            info!("node status refresh disabled");
            return Self { worker: None };
        }
        debug!(interval_ms = interval.as_millis(), "starting node status refresher");
        Self {
            worker: Some(BackgroundWorker::start(
                RefreshRunnable { discovery },
                Some(interval),
            )),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(BackgroundWorker::is_running)
    }

    /// Requests a refresh ahead of the next tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresher is disabled or stopped.
    pub async fn refresh_now(&self) -> anyhow::Result<()> {
        match &self.worker {
            Some(worker) => worker.submit(RefreshTask::Now).await,
            None => Err(anyhow::anyhow!("node status refresh is disabled")),
        }
    }

    /// Stops the refresher, aborting a refresh still running after `grace`.
    pub async fn stop(&mut self, grace: Duration) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop_with_grace(grace).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use courier_core::NodeAddress;

    use super::*;

    #[derive(Default)]
    struct CountingDiscovery {
        refreshes: AtomicU32,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl ServiceDiscovery for CountingDiscovery {
        async fn register(&self, _service: &str, _node: NodeAddress) -> anyhow::Result<()> {
            Ok(())
        }

        async fn deregister(&self, _service: &str, _node: &NodeAddress) -> anyhow::Result<()> {
            Ok(())
        }

        async fn list(&self, _service: &str) -> anyhow::Result<Vec<NodeAddress>> {
            Ok(Vec::new())
        }

        async fn refresh(&self) -> anyhow::Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            anyhow::ensure!(self.refreshes.load(Ordering::SeqCst) != 2, "probe failed");
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_on_every_tick_and_survives_errors() {
        let discovery = Arc::new(CountingDiscovery::default());
        let mut refresher = StatusRefresher::start(
            Arc::clone(&discovery) as Arc<dyn ServiceDiscovery>,
            Duration::from_secs(10),
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(discovery.refreshes.load(Ordering::SeqCst), 3);
        assert!(refresher.is_running());

        refresher.stop(Duration::from_secs(1)).await;
        assert!(!refresher.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_disables_refresh() {
        let discovery = Arc::new(CountingDiscovery::default());
        let mut refresher =
            StatusRefresher::start(Arc::clone(&discovery) as Arc<dyn ServiceDiscovery>, Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(discovery.refreshes.load(Ordering::SeqCst), 0);
        assert!(!refresher.is_running());
        assert!(refresher.refresh_now().await.is_err());
        refresher.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_now_runs_before_the_next_tick() {
        let discovery = Arc::new(CountingDiscovery::default());
        let mut refresher = StatusRefresher::start(
            Arc::clone(&discovery) as Arc<dyn ServiceDiscovery>,
            Duration::from_secs(3600),
        );

        refresher.refresh_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(discovery.refreshes.load(Ordering::SeqCst), 1);
        refresher.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_refresh_is_abandoned_after_grace() {
        let discovery = Arc::new(CountingDiscovery {
            stall: Some(Duration::from_secs(600)),
            ..CountingDiscovery::default()
        });
        let mut refresher = StatusRefresher::start(
            Arc::clone(&discovery) as Arc<dyn ServiceDiscovery>,
            Duration::from_secs(1),
        );
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let started = tokio::time::Instant::now();
        refresher.stop(Duration::from_secs(1)).await;
        assert!(started.elapsed() <= Duration::from_secs(2));
        assert!(!refresher.is_running());
    }
}
