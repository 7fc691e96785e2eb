//! Courier runtime: routed RPC calls over a length-prefixed TCP transport.
//!
//! A call enters through [`ClientInvoker::invoke`], passes the caching,
//! interceptor and circuit breaker stages, and finishes either in a local
//! handler or on a remote node picked through [`discovery`]. Remote nodes run
//! a [`RemotingServer`] that feeds each request through its own server-side
//! pipeline. [`CourierNode`] wires all of it from a [`CourierConfig`].

pub mod breaker;
pub mod caching;
pub mod config;
pub mod discovery;
pub mod interceptor;
pub mod invoker;
pub mod node;
pub mod proxy;
pub mod registry;
pub mod remoting;
pub mod telemetry;

pub use courier_core;

pub use breaker::{CircuitBreakerOptions, CircuitBreakerOverride, CircuitBreakerRegistry, CircuitState};
pub use caching::{Cache, MemoryCache};
pub use config::{CachingOptions, ClientSettings, CourierConfig, ServerSettings};
pub use discovery::{LoadBalancer, MemoryDiscovery, ServiceDiscovery, StatusRefresher};
pub use interceptor::{per_call, shared, Interceptor, InterceptorContext, InterceptorSettings};
pub use invoker::ClientInvoker;
pub use node::{CourierNode, CourierNodeBuilder};
pub use proxy::ServiceProxy;
pub use registry::{handler_fn, InvokeArgs, MethodDefinition, RouteRegistry, ServiceDefinition};
pub use remoting::{Dispatcher, RemotingClient, RemotingServer};
