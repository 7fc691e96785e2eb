//! Client-side entry point for every call.
//!
//! The client chain is: caching stage, global interceptors, class and method
//! interceptors, circuit breaker, then a terminal that either runs the
//! route in-process or sends it to a remote node.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::codec::from_value;
use courier_core::{Metadata, NodeAddress, RemotingStatus, RpcError, ServiceResult, Value};
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::breaker::{CircuitBreakerInterceptor, CircuitBreakerRegistry};
use crate::caching::Cache;
use crate::config::ClientSettings;
use crate::discovery::{LoadBalancer, RoundRobinBalancer, ServiceDiscovery};
use crate::interceptor::{
    CachingInterceptor, Interceptor, InterceptorContext, InterceptorSettings, Pipeline, Terminal,
};
use crate::registry::RouteRegistry;
use crate::remoting::{Dispatcher, RemotingClientFactory};

// ---------------------------------------------------------------------------
// Terminals
// ---------------------------------------------------------------------------

/// Runs the route through this node's own server pipeline.
struct LocalTerminal {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl Terminal for LocalTerminal {
    async fn invoke(&self, ctx: &mut InterceptorContext) -> ServiceResult {
        trace!(route = %ctx.route, "invoking locally");
        self.dispatcher
            .invoke_local(Arc::clone(ctx.descriptor()), ctx.args.clone(), ctx.meta.clone())
            .await
    }
}

/// Picks a node for the route's service and sends the call there.
struct RemoteTerminal {
    discovery: Arc<dyn ServiceDiscovery>,
    balancer: Arc<dyn LoadBalancer>,
    clients: Arc<RemotingClientFactory>,
}

impl RemoteTerminal {
    async fn pick_node(&self, service: &str) -> Result<NodeAddress, ServiceResult> {
        let nodes = self.discovery.list(service).await.map_err(|err| {
            ServiceResult::failure(
                RemotingStatus::TransportFailure,
                format!("discovery lookup for {service} failed: {err:#}"),
            )
        })?;
        self.balancer.select(service, &nodes).ok_or_else(|| {
            ServiceResult::failure(
                RemotingStatus::TransportFailure,
                format!("no available node for service {service}"),
            )
        })
    }
}

#[async_trait]
impl Terminal for RemoteTerminal {
    async fn invoke(&self, ctx: &mut InterceptorContext) -> ServiceResult {
        let service = ctx.descriptor().service.clone();
        let node = match self.pick_node(&service).await {
            Ok(node) => node,
            Err(result) => return result,
        };
        let client = match self.clients.get_or_connect(&node).await {
            Ok(client) => client,
            Err(err) => return ServiceResult::from(err),
        };

        let result = client.send(ctx.to_invoke_message()).await;
        if result.status == RemotingStatus::TransportFailure {
            debug!(node = %node, route = %ctx.route, "dropping failed connection");
            let clients = Arc::clone(&self.clients);
            tokio::spawn(async move { clients.remove_if_same(&node, &client).await });
        }
        result
    }
}

// ---------------------------------------------------------------------------
// ClientInvoker
// ---------------------------------------------------------------------------

/// Invokes routes by name, locally or remotely.
pub struct ClientInvoker {
    registry: Arc<RouteRegistry>,
    settings: ClientSettings,
    interceptors: InterceptorSettings,
    caching: Option<Arc<dyn Interceptor>>,
    breaker: Arc<dyn Interceptor>,
    breakers: Arc<CircuitBreakerRegistry>,
    local: LocalTerminal,
    remote: RemoteTerminal,
}

impl ClientInvoker {
    /// An invoker with round-robin balancing, no cache and no client
    /// interceptors.
    #[must_use]
    pub fn new(
        registry: Arc<RouteRegistry>,
        settings: ClientSettings,
        dispatcher: Arc<Dispatcher>,
        discovery: Arc<dyn ServiceDiscovery>,
        clients: Arc<RemotingClientFactory>,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new());
        Self {
            registry,
            settings,
            interceptors: InterceptorSettings::new(),
            caching: None,
            breaker: Arc::new(CircuitBreakerInterceptor::new(Arc::clone(&breakers))),
            breakers,
            local: LocalTerminal { dispatcher },
            remote: RemoteTerminal {
                discovery,
                balancer: Arc::new(RoundRobinBalancer::new()),
                clients,
            },
        }
    }

    /// Global client interceptors. Server-side entries are ignored here.
    #[must_use]
    pub fn with_interceptors(mut self, interceptors: InterceptorSettings) -> Self {
        self.interceptors = interceptors;
        self
    }

    /// Enables the caching stage for routes that carry a caching config.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.caching = Some(Arc::new(CachingInterceptor::new(cache)));
        self
    }

    #[must_use]
    pub fn with_balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.remote.balancer = balancer;
        self
    }

    /// Replaces the breaker registry, e.g. to install custom event hooks.
    #[must_use]
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breaker = Arc::new(CircuitBreakerInterceptor::new(Arc::clone(&breakers)));
        self.breakers = breakers;
        self
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    /// Invokes `route` and returns its result. Never fails outright: every
    /// failure is a non-`Ok` status.
    pub async fn invoke(&self, route: &str, args: Vec<Value>, meta: Metadata) -> ServiceResult {
        let descriptor = match self.registry.lookup(route) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(route, "invoking unregistered route");
                return ServiceResult::from(err);
            }
        };
        if args.len() != descriptor.signature.arity() {
            return ServiceResult::fault(format!(
                "route {} expects {} argument(s), got {}",
                descriptor.route,
                descriptor.signature.arity(),
                args.len()
            ));
        }

        let mut pipeline = Pipeline::assemble(
            self.interceptors.client_global(),
            &descriptor.client_interceptors,
        );
        if let Some(caching) = &self.caching {
            pipeline.prepend(Arc::clone(caching));
        }
        pipeline.append(Arc::clone(&self.breaker));

        let terminal: &dyn Terminal =
            if descriptor.is_local() && !self.settings.is_dependency(&descriptor.service) {
                &self.local
            } else {
                &self.remote
            };

        let mut ctx = InterceptorContext::new(descriptor, args, meta);
        pipeline.execute(&mut ctx, terminal).await
    }

    /// Invokes `route` and decodes the value as `T`.
    ///
    /// # Errors
    ///
    /// The [`RpcError`] matching a non-`Ok` status, or [`RpcError::Codec`]
    /// if the value does not decode as `T`.
    pub async fn invoke_as<T: DeserializeOwned>(
        &self,
        route: &str,
        args: Vec<Value>,
        meta: Metadata,
    ) -> Result<T, RpcError> {
        let value = self.invoke(route, args, meta).await.into_result(route)?;
        Ok(from_value(value)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::breaker::{CircuitBreakerOptions, CircuitBreakerOverride};
    use crate::caching::MemoryCache;
    use crate::config::CachingOptions;
    use crate::discovery::{HealthCheck, MemoryDiscovery};
    use crate::interceptor::{shared, Next};
    use crate::registry::{
        handler_fn, InvokeArgs, MethodDefinition, RouteRegistryBuilder, ServiceDefinition,
    };
    use crate::remoting::ClientOptions;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    struct Tag {
        name: &'static str,
        log: Log,
    }

    #[async_trait]
    impl Interceptor for Tag {
        async fn intercept(&self, ctx: &mut InterceptorContext, next: Next<'_>) -> ServiceResult {
            self.log.lock().push(self.name);
            next.run(ctx).await
        }
    }

    fn tag(name: &'static str, log: &Log) -> crate::interceptor::InterceptorRef {
        shared(
            name,
            Tag {
                name,
                log: Arc::clone(log),
            },
        )
    }

    struct AlwaysUp;

    #[async_trait]
    impl HealthCheck for AlwaysUp {
        async fn check(&self, _node: &NodeAddress) -> bool {
            true
        }
    }

    struct Fixture {
        log: Log,
        adds: Arc<AtomicU32>,
        discovery: Arc<MemoryDiscovery>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
                adds: Arc::new(AtomicU32::new(0)),
                discovery: Arc::new(MemoryDiscovery::with_health_check(Arc::new(AlwaysUp))),
            }
        }

        fn calc(&self) -> ServiceDefinition {
            let adds = Arc::clone(&self.adds);
            ServiceDefinition::new("Calc")
                .client_interceptor(tag("class", &self.log))
                .method(
                    MethodDefinition::new("Add")
                        .param("a", "i64")
                        .param("b", "i64")
                        .client_interceptor(tag("method", &self.log))
                        .handler(handler_fn(move |args: InvokeArgs, _meta| {
                            let adds = Arc::clone(&adds);
                            async move {
                                adds.fetch_add(1, Ordering::SeqCst);
                                Ok::<_, anyhow::Error>(args.get::<i64>(0)? + args.get::<i64>(1)?)
                            }
                        })),
                )
        }

        fn invoker(
            &self,
            settings: ClientSettings,
            breaker: Option<CircuitBreakerOptions>,
            caching: Option<CachingOptions>,
            extra: Option<ServiceDefinition>,
        ) -> ClientInvoker {
            let mut builder = RouteRegistryBuilder::new()
                .with_circuit_breaker(breaker)
                .with_caching(caching);
            builder.add_service(&self.calc()).unwrap();
            if let Some(extra) = extra {
                builder.add_service(&extra).unwrap();
            }
            let registry = Arc::new(builder.build());
            let dispatcher = Arc::new(Dispatcher::new(
                Arc::clone(&registry),
                InterceptorSettings::new(),
            ));
            let clients = Arc::new(RemotingClientFactory::new(
                ClientOptions::default(),
                Duration::from_secs(1),
            ));
            ClientInvoker::new(
                registry,
                settings,
                dispatcher,
                Arc::clone(&self.discovery) as Arc<dyn ServiceDiscovery>,
                clients,
            )
            .with_interceptors(InterceptorSettings::new().with_client(tag("global", &self.log)))
        }
    }

    fn two_and_three() -> Vec<Value> {
        vec![Value::from(2), Value::from(3)]
    }

    #[tokio::test]
    async fn local_call_runs_client_chain_in_order() {
        let fixture = Fixture::new();
        let invoker = fixture.invoker(ClientSettings::default(), None, None, None);

        let sum: i64 = invoker
            .invoke_as("Calc/Add", two_and_three(), Metadata::new())
            .await
            .unwrap();
        assert_eq!(sum, 5);
        assert_eq!(*fixture.log.lock(), vec!["global", "class", "method"]);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let fixture = Fixture::new();
        let invoker = fixture.invoker(ClientSettings::default(), None, None, None);
        let err = invoker
            .invoke_as::<i64>("Calc/Mul", two_and_three(), Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::NotFoundRoute { .. }));
        assert!(fixture.log.lock().is_empty());
    }

    #[tokio::test]
    async fn wrong_arity_never_reaches_the_chain() {
        let fixture = Fixture::new();
        let invoker = fixture.invoker(ClientSettings::default(), None, None, None);
        let result = invoker
            .invoke("Calc/Add", vec![Value::from(1)], Metadata::new())
            .await;
        assert_eq!(result.status, RemotingStatus::Fault);
        assert!(fixture.log.lock().is_empty());
    }

    #[tokio::test]
    async fn dependency_service_goes_remote_even_when_hosted() {
        let fixture = Fixture::new();
        let settings = ClientSettings {
            dependency_services: vec!["calc".to_string()],
            ..ClientSettings::default()
        };
        let invoker = fixture.invoker(settings, None, None, None);

        let result = invoker
            .invoke("Calc/Add", two_and_three(), Metadata::new())
            .await;
        assert_eq!(result.status, RemotingStatus::TransportFailure);
        assert!(result.message.unwrap().contains("no available node"));
        assert_eq!(fixture.adds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cached_value_skips_the_handler() {
        let fixture = Fixture::new();
        let invoker = fixture
            .invoker(
                ClientSettings::default(),
                None,
                Some(CachingOptions::default()),
                None,
            )
            .with_cache(Arc::new(MemoryCache::new(64)));

        for _ in 0..3 {
            let result = invoker
                .invoke("Calc/Add", two_and_three(), Metadata::new())
                .await;
            assert_eq!(result.value, Some(Value::from(5)));
        }
        assert_eq!(fixture.adds.load(Ordering::SeqCst), 1);

        invoker
            .invoke("Calc/Add", vec![Value::from(1), Value::from(1)], Metadata::new())
            .await;
        assert_eq!(fixture.adds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_remote_opens_the_circuit() {
        let fixture = Fixture::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        fixture
            .discovery
            .register("Weather", NodeAddress::new("127.0.0.1", port))
            .await
            .unwrap();

        let weather = ServiceDefinition::new("Weather").method(
            MethodDefinition::new("Today").circuit_breaker(
                CircuitBreakerOverride::new()
                    .retry(0)
                    .exceptions_allowed_before_breaking(2)
                    .duration_of_break(Duration::from_secs(60)),
            ),
        );
        let invoker = fixture.invoker(
            ClientSettings::default(),
            Some(CircuitBreakerOptions::default()),
            None,
            Some(weather),
        );

        for _ in 0..2 {
            let result = invoker
                .invoke("Weather/Today", Vec::new(), Metadata::new())
                .await;
            assert_eq!(result.status, RemotingStatus::TransportFailure);
        }
        let result = invoker
            .invoke("Weather/Today", Vec::new(), Metadata::new())
            .await;
        assert_eq!(result.status, RemotingStatus::CircuitOpen);
    }
}
