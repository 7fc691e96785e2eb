use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::ServiceResult;

use crate::interceptor::InterceptorContext;

/// Produces a substitute result while a route's circuit is open.
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    async fn fallback(&self, ctx: InterceptorContext) -> ServiceResult;
}

struct FnFallback<F>(F);

#[async_trait]
impl<F, Fut> FallbackHandler for FnFallback<F>
where
    F: Fn(InterceptorContext) -> Fut + Send + Sync,
    Fut: Future<Output = ServiceResult> + Send + 'static,
{
    async fn fallback(&self, ctx: InterceptorContext) -> ServiceResult {
        (self.0)(ctx).await
    }
}

/// Wraps an async closure as a [`FallbackHandler`].
pub fn fallback_fn<F, Fut>(f: F) -> Arc<dyn FallbackHandler>
where
    F: Fn(InterceptorContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ServiceResult> + Send + 'static,
{
    Arc::new(FnFallback(f))
}
