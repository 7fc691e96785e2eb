//! In-process discovery with pluggable health probing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::NodeAddress;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::ServiceDiscovery;

/// Decides whether a node is reachable.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, node: &NodeAddress) -> bool;
}

/// Healthy when a TCP connection can be opened within the timeout.
#[derive(Debug, Clone, Copy)]
pub struct TcpHealthCheck {
    timeout: Duration,
}

impl TcpHealthCheck {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpHealthCheck {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl HealthCheck for TcpHealthCheck {
    async fn check(&self, node: &NodeAddress) -> bool {
        matches!(
            tokio::time::timeout(
                self.timeout,
                TcpStream::connect((node.host.as_str(), node.port))
            )
            .await,
            Ok(Ok(_))
        )
    }
}

/// Service name to nodes, each with a health flag.
pub struct MemoryDiscovery {
    services: DashMap<String, BTreeMap<NodeAddress, bool>>,
    health: Arc<dyn HealthCheck>,
}

impl MemoryDiscovery {
    /// Uses [`TcpHealthCheck`] with its default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_health_check(Arc::new(TcpHealthCheck::default()))
    }

    #[must_use]
    pub fn with_health_check(health: Arc<dyn HealthCheck>) -> Self {
        Self {
            services: DashMap::new(),
            health,
        }
    }

    /// Every registered node for `service` with its health flag.
    #[must_use]
    pub fn nodes(&self, service: &str) -> Vec<(NodeAddress, bool)> {
        self.services
            .get(&key(service))
            .map(|nodes| nodes.iter().map(|(n, h)| (n.clone(), *h)).collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

fn key(service: &str) -> String {
    service.to_ascii_lowercase()
}

#[async_trait]
impl ServiceDiscovery for MemoryDiscovery {
    async fn register(&self, service: &str, node: NodeAddress) -> anyhow::Result<()> {
        debug!(service, node = %node, "registering node");
        self.services
            .entry(key(service))
            .or_default()
            .entry(node)
            .or_insert(true);
        Ok(())
    }

    async fn deregister(&self, service: &str, node: &NodeAddress) -> anyhow::Result<()> {
        let service = key(service);
        let now_empty = match self.services.get_mut(&service) {
            Some(mut nodes) => {
                nodes.remove(node);
                nodes.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.services.remove_if(&service, |_, nodes| nodes.is_empty());
        }
        debug!(service, node = %node, "deregistered node");
        Ok(())
    }

    async fn list(&self, service: &str) -> anyhow::Result<Vec<NodeAddress>> {
        Ok(self
            .services
            .get(&key(service))
            .map(|nodes| {
                nodes
                    .iter()
                    .filter(|(_, healthy)| **healthy)
                    .map(|(node, _)| node.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        // Probe each distinct node once, without holding any map guard.
        let nodes: BTreeSet<NodeAddress> = self
            .services
            .iter()
            .flat_map(|entry| entry.value().keys().cloned().collect::<Vec<_>>())
            .collect();
        let probes = nodes.into_iter().map(|node| {
            let health = Arc::clone(&self.health);
            async move {
                let healthy = health.check(&node).await;
                (node, healthy)
            }
        });
        let status: HashMap<NodeAddress, bool> = join_all(probes).await.into_iter().collect();

        for mut entry in self.services.iter_mut() {
            let service = entry.key().clone();
            for (node, healthy) in entry.value_mut().iter_mut() {
                let Some(&now) = status.get(node) else { continue };
                if *healthy != now {
                    if now {
                        info!(service = %service, node = %node, "node recovered");
                    } else {
                        warn!(service = %service, node = %node, "node unreachable");
                    }
                    *healthy = now;
                }
            }
        }
        Ok(())
    }
}
