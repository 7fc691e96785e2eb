//! Per-route circuit breaker, run as one stage of the client pipeline.
//!
//! - [`config`]: global defaults, method overrides, resolved route config
//! - [`state`]: the Closed/Open/HalfOpen state machine
//! - [`events`]: transition hooks with tracing defaults
//! - [`fallback`]: substitute results while the circuit is open
//! - [`interceptor`]: the pipeline stage and the per-route breaker registry

pub mod config;
pub mod events;
pub mod fallback;
pub mod interceptor;
pub mod state;

pub use config::{BreakerMarker, CircuitBreakerConfig, CircuitBreakerOptions, CircuitBreakerOverride};
pub use events::{CircuitBreakerEvents, TracingEvents};
pub use fallback::{fallback_fn, FallbackHandler};
pub use interceptor::{CircuitBreakerInterceptor, CircuitBreakerRegistry};
pub use state::{CircuitBreaker, CircuitState, Permit, Transition};
