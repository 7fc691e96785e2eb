//! Client-side stage that serves value-returning routes from a [`Cache`].

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Codec, MsgPackCodec, ServiceResult, Value};
use tracing::{trace, warn};

use super::{Interceptor, InterceptorContext, Next};
use crate::caching::{key, Cache};

/// Returns cached values without running the rest of the chain.
///
/// Routes without a caching config pass straight through. Cache errors never
/// fail the call: they are logged and the call proceeds as a miss.
pub struct CachingInterceptor {
    cache: Arc<dyn Cache>,
    codec: MsgPackCodec,
}

impl CachingInterceptor {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            codec: MsgPackCodec,
        }
    }

    async fn lookup(&self, key: &str) -> Option<Value> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => match self.codec.deserialize::<Value>(&bytes) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, error = %err, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "cache read failed");
                None
            }
        }
    }

    async fn store(&self, key: &str, value: &Value, ttl: Option<std::time::Duration>) {
        let bytes = match self.codec.serialize(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key, error = %err, "cannot encode value for cache");
                return;
            }
        };
        if let Err(err) = self.cache.set(key, bytes, ttl).await {
            warn!(key, error = %err, "cache write failed");
        }
    }
}

#[async_trait]
impl Interceptor for CachingInterceptor {
    async fn intercept(&self, ctx: &mut InterceptorContext, next: Next<'_>) -> ServiceResult {
        let Some(config) = ctx.descriptor().caching.clone() else {
            return next.run(ctx).await;
        };
        let key = key::render(&config.key_placeholder, &ctx.args);

        if let Some(value) = self.lookup(&key).await {
            trace!(route = %ctx.route, key = %key, "cache hit");
            return ServiceResult::ok(value);
        }

        let result = next.run(ctx).await;
        if let (true, Some(value)) = (result.is_ok(), result.value.as_ref()) {
            self.store(&key, value, config.expire).await;
        }
        result
    }
}
