//! Result caching for value-returning routes.
//!
//! - [`key`]: cache key placeholders and per-call rendering
//! - [`memory`]: in-process [`Cache`] backed by `quick_cache`
//!
//! The pipeline stage that uses these lives in
//! [`crate::interceptor::caching`].

pub mod key;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryCache;

use crate::config::CachingOptions;

/// Byte-oriented cache store.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Stores `value` under `key`. `None` means the entry never expires.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Returns the stored bytes, or `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn remove(&self, keys: &[String]) -> anyhow::Result<()>;
}

/// How a class or method relates to the global caching settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CachingMarker {
    /// Use the global key layout and expiry.
    #[default]
    Inherit,
    /// Custom key template and/or expiry. Unset fields fall back to the
    /// global settings.
    Override {
        key: Option<String>,
        expire_seconds: Option<u64>,
    },
    /// Never cache this class or method.
    Disabled,
}

/// Resolved caching settings attached to one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachingConfig {
    /// Key template with `{0}`, `{1}`… argument slots.
    pub key_placeholder: String,
    /// `true` when the template came from a method override.
    pub custom_key: bool,
    /// `None` means entries never expire.
    pub expire: Option<Duration>,
}

impl CachingConfig {
    /// Resolves caching for one method.
    ///
    /// Returns `None` when caching is not configured globally or the method
    /// opts out. Callers are responsible for only asking about routes that
    /// return a value.
    #[must_use]
    pub fn resolve(
        global: Option<&CachingOptions>,
        route: &str,
        param_count: usize,
        marker: &CachingMarker,
    ) -> Option<Self> {
        let global = global?;
        let (custom, expire_seconds) = match marker {
            CachingMarker::Disabled => return None,
            CachingMarker::Inherit => (None, global.expire_seconds),
            CachingMarker::Override {
                key,
                expire_seconds,
            } => (
                key.as_deref(),
                expire_seconds.unwrap_or(global.expire_seconds),
            ),
        };

        let key_placeholder = key::placeholder(&global.key_prefix, route, param_count, custom);
        Some(Self {
            key_placeholder,
            custom_key: custom.is_some(),
            expire: (expire_seconds > 0).then(|| Duration::from_secs(expire_seconds)),
        })
    }
}
