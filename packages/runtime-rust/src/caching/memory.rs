use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::Cache;

#[derive(Debug, Clone)]
struct Entry {
    bytes: Bytes,
    expires_at: Option<Instant>,
}

/// In-process cache with a bounded entry count and per-entry expiry.
///
/// Expired entries are dropped lazily on read. Empty values are treated as
/// absent.
pub struct MemoryCache {
    entries: quick_cache::sync::Cache<String, Entry>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: quick_cache::sync::Cache::new(capacity.max(1)),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()> {
        let entry = Entry {
            bytes: Bytes::from(value),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.expires_at.is_some_and(|at| Instant::now() >= at) {
            self.entries.remove(key);
            return Ok(None);
        }
        if entry.bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(entry.bytes.to_vec()))
    }

    async fn remove(&self, keys: &[String]) -> anyhow::Result<()> {
        for key in keys {
            self.entries.remove(key.as_str());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let cache = MemoryCache::new(8);
        cache.set("k", vec![1, 2, 3], None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = MemoryCache::new(8);
        cache
            .set("k", vec![1], Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn empty_value_reads_as_absent() {
        let cache = MemoryCache::new(8);
        cache.set("k", Vec::new(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_deletes_all_given_keys() {
        let cache = MemoryCache::new(8);
        cache.set("a", vec![1], None).await.unwrap();
        cache.set("b", vec![2], None).await.unwrap();
        cache.set("c", vec![3], None).await.unwrap();

        cache
            .remove(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_none());
        assert_eq!(cache.get("c").await.unwrap(), Some(vec![3]));
    }
}
