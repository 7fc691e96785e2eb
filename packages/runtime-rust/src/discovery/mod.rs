//! Service discovery and node selection.
//!
//! - [`memory`]: in-process registry with health probing
//! - [`balancer`]: picks one node among the healthy ones
//! - [`worker`]: generic background task runner
//! - [`refresh`]: periodic health refresh built on the worker

pub mod balancer;
pub mod memory;
pub mod refresh;
pub mod worker;

use async_trait::async_trait;
use courier_core::NodeAddress;

pub use balancer::{LoadBalancer, RandomBalancer, RoundRobinBalancer};
pub use memory::{HealthCheck, MemoryDiscovery, TcpHealthCheck};
pub use refresh::StatusRefresher;
pub use worker::{BackgroundRunnable, BackgroundWorker};

/// Where services live.
///
/// Service names are matched without regard to case.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Announces that `node` serves `service`. Registering twice is a no-op.
    async fn register(&self, service: &str, node: NodeAddress) -> anyhow::Result<()>;

    async fn deregister(&self, service: &str, node: &NodeAddress) -> anyhow::Result<()>;

    /// Healthy nodes for `service`, in a stable order.
    async fn list(&self, service: &str) -> anyhow::Result<Vec<NodeAddress>>;

    /// Re-evaluates node health.
    async fn refresh(&self) -> anyhow::Result<()>;
}
