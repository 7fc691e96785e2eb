//! Node selection among healthy candidates.

use std::sync::atomic::{AtomicUsize, Ordering};

use courier_core::NodeAddress;
use dashmap::DashMap;
use rand::Rng;

pub trait LoadBalancer: Send + Sync {
    /// Picks one of `nodes`, or `None` when the slice is empty.
    fn select(&self, service: &str, nodes: &[NodeAddress]) -> Option<NodeAddress>;
}

/// Cycles through the candidates, with one cursor per service.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobinBalancer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, service: &str, nodes: &[NodeAddress]) -> Option<NodeAddress> {
        if nodes.is_empty() {
            return None;
        }
        let cursor = self
            .cursors
            .entry(service.to_ascii_lowercase())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        nodes.get(cursor % nodes.len()).cloned()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn select(&self, _service: &str, nodes: &[NodeAddress]) -> Option<NodeAddress> {
        if nodes.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..nodes.len());
        nodes.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn nodes() -> Vec<NodeAddress> {
        (1..=3).map(|p| NodeAddress::new("n", p)).collect()
    }

    #[test]
    fn round_robin_cycles_per_service() {
        let balancer = RoundRobinBalancer::new();
        let nodes = nodes();
        let picks: Vec<u16> = (0..4)
            .map(|_| balancer.select("Calc", &nodes).unwrap().port)
            .collect();
        assert_eq!(picks, vec![1, 2, 3, 1]);
        assert_eq!(balancer.select("Other", &nodes).unwrap().port, 1);
    }

    #[test]
    fn empty_candidates_select_nothing() {
        assert!(RoundRobinBalancer::new().select("Calc", &[]).is_none());
        assert!(RandomBalancer.select("Calc", &[]).is_none());
    }

    #[test]
    fn random_stays_within_candidates() {
        let nodes = nodes();
        for _ in 0..32 {
            assert!(nodes.contains(&RandomBalancer.select("Calc", &nodes).unwrap()));
        }
    }

    proptest! {
        #[test]
        fn round_robin_spreads_full_rounds_evenly(count in 1u16..8, rounds in 1usize..5) {
            let nodes: Vec<NodeAddress> = (0..count).map(|p| NodeAddress::new("n", p)).collect();
            let balancer = RoundRobinBalancer::new();
            let mut hits = vec![0usize; nodes.len()];
            for _ in 0..rounds * nodes.len() {
                let pick = balancer.select("Calc", &nodes).unwrap();
                hits[usize::from(pick.port)] += 1;
            }
            prop_assert!(hits.iter().all(|&h| h == rounds));
        }
    }
}
