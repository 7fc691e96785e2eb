//! Breaker stage for the client pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{RemotingStatus, RouteKey, ServiceResult};
use dashmap::DashMap;
use tracing::error;

use super::config::CircuitBreakerConfig;
use super::events::{CircuitBreakerEvents, TracingEvents};
use super::fallback::FallbackHandler;
use super::state::{CircuitBreaker, Transition};
use crate::interceptor::{Interceptor, InterceptorContext, Next};

// ---------------------------------------------------------------------------
// CircuitBreakerRegistry
// ---------------------------------------------------------------------------

/// Owns one breaker per route, created on first use from the route's config.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<RouteKey, Arc<CircuitBreaker>>,
    events: Arc<dyn CircuitBreakerEvents>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_events(Arc::new(TracingEvents))
    }

    #[must_use]
    pub fn with_events(events: Arc<dyn CircuitBreakerEvents>) -> Self {
        Self {
            breakers: DashMap::new(),
            events,
        }
    }

    /// Returns the breaker for `route`, creating it from `config` if needed.
    pub fn breaker_for(&self, route: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(RouteKey::new(route))
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    config.exceptions_allowed_before_breaking,
                    config.duration_of_break,
                ))
            })
            .clone()
    }

    /// Returns the breaker for `route` if one has been created.
    #[must_use]
    pub fn get(&self, route: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(&RouteKey::new(route)).map(|b| b.clone())
    }

    #[must_use]
    pub fn events(&self) -> &Arc<dyn CircuitBreakerEvents> {
        &self.events
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerInterceptor
// ---------------------------------------------------------------------------

/// Applies the route's breaker policy around the rest of the chain.
///
/// Routes without a breaker config pass straight through. Otherwise each
/// attempt is bounded by the configured timeout, transient failures are
/// retried, and the final outcome is recorded on the route's breaker.
pub struct CircuitBreakerInterceptor {
    registry: Arc<CircuitBreakerRegistry>,
}

impl CircuitBreakerInterceptor {
    #[must_use]
    pub fn new(registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Interceptor for CircuitBreakerInterceptor {
    async fn intercept(&self, ctx: &mut InterceptorContext, next: Next<'_>) -> ServiceResult {
        let Some(config) = ctx.descriptor().circuit_breaker.clone() else {
            return next.run(ctx).await;
        };
        let route = ctx.route.clone();
        let events = self.registry.events();
        let breaker = self.registry.breaker_for(&route, &config);

        let Some(permit) = breaker.try_acquire() else {
            events.on_rejected(&route);
            return match &config.fallback {
                Some(handler) => run_fallback(Arc::clone(handler), ctx.clone()).await,
                None => ServiceResult::failure(
                    RemotingStatus::CircuitOpen,
                    format!("circuit open for route {route}"),
                ),
            };
        };
        // A half-open trial is a single attempt.
        let retries = if permit.is_trial() {
            events.on_half_open(&route);
            0
        } else {
            config.retry
        };

        let mut attempt = 0;
        let result = loop {
            let result = match tokio::time::timeout(config.timeout, next.run(ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    events.on_timeout(&route, config.timeout);
                    ServiceResult::timeout(format!(
                        "attempt on {route} exceeded {}ms",
                        config.timeout.as_millis()
                    ))
                }
            };
            if !result.status.is_transient_failure() || attempt >= retries {
                break result;
            }
            attempt += 1;
            events.on_retry(&route, attempt, result.status);
        };

        let transition = match result.status {
            RemotingStatus::Ok => permit.success(),
            status if status.is_transient_failure() => permit.failure(),
            _ => permit.release(),
        };
        match transition {
            Some(Transition::Opened) => events.on_break(
                &route,
                config.exceptions_allowed_before_breaking,
                config.duration_of_break,
            ),
            Some(Transition::Closed) => events.on_reset(&route),
            None => {}
        }

        result
    }
}

/// Runs the fallback on its own task. A panic there becomes a `Fault`.
async fn run_fallback(handler: Arc<dyn FallbackHandler>, ctx: InterceptorContext) -> ServiceResult {
    let route = ctx.route.clone();
    match tokio::spawn(async move { handler.fallback(ctx).await }).await {
        Ok(result) => result,
        Err(err) => {
            error!(route = %route, error = %err, "fallback handler failed");
            ServiceResult::fault(format!("fallback for {route} failed: {err}"))
        }
    }
}
