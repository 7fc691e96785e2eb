//! Node lifecycle: everything a process needs to serve and call routes.
//!
//! `CourierNodeBuilder::build()` freezes the route table and wires the
//! invoker, dispatcher and (optionally) the server. `start()` binds, announces
//! local services and starts the status refresher; `shutdown()` undoes each
//! step within its configured grace period.

use std::sync::Arc;

use courier_core::{NodeAddress, RpcError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::breaker::{CircuitBreakerEvents, CircuitBreakerRegistry};
use crate::caching::{Cache, MemoryCache};
use crate::config::CourierConfig;
use crate::discovery::{LoadBalancer, MemoryDiscovery, ServiceDiscovery, StatusRefresher};
use crate::interceptor::InterceptorSettings;
use crate::invoker::ClientInvoker;
use crate::registry::{RouteRegistry, RouteRegistryBuilder, ServiceDefinition};
use crate::remoting::{ClientOptions, Dispatcher, RemotingClientFactory, RemotingServer, ShutdownController};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[must_use]
pub struct CourierNodeBuilder {
    config: CourierConfig,
    services: Vec<ServiceDefinition>,
    interceptors: InterceptorSettings,
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    cache: Option<Arc<dyn Cache>>,
    balancer: Option<Arc<dyn LoadBalancer>>,
    breaker_events: Option<Arc<dyn CircuitBreakerEvents>>,
}

impl CourierNodeBuilder {
    pub fn new(config: CourierConfig) -> Self {
        Self {
            config,
            services: Vec::new(),
            interceptors: InterceptorSettings::new(),
            discovery: None,
            cache: None,
            balancer: None,
            breaker_events: None,
        }
    }

    /// Adds a service; hosted if its methods carry handlers, callable either way.
    pub fn service(mut self, definition: ServiceDefinition) -> Self {
        self.services.push(definition);
        self
    }

    /// Global client and server interceptors.
    pub fn interceptors(mut self, interceptors: InterceptorSettings) -> Self {
        self.interceptors = interceptors;
        self
    }

    /// Defaults to a [`MemoryDiscovery`] with TCP health checks.
    pub fn discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Defaults to a [`MemoryCache`] sized from the caching config, when
    /// caching is configured.
    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    pub fn breaker_events(mut self, events: Arc<dyn CircuitBreakerEvents>) -> Self {
        self.breaker_events = Some(events);
        self
    }

    /// Registers every service and wires the node.
    ///
    /// # Errors
    ///
    /// [`RpcError::DuplicateRoute`] if two methods resolve to the same route.
    pub fn build(self) -> Result<CourierNode, RpcError> {
        let config = self.config;
        let mut builder = RouteRegistryBuilder::new()
            .with_circuit_breaker(config.circuit_breaker.clone())
            .with_caching(config.caching.clone());
        for service in &self.services {
            builder.add_service(service)?;
        }
        let registry = Arc::new(builder.build());
        info!(routes = registry.len(), "route table built");

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            self.interceptors.clone(),
        ));
        let discovery = self
            .discovery
            .unwrap_or_else(|| Arc::new(MemoryDiscovery::new()));
        let clients = Arc::new(RemotingClientFactory::new(
            ClientOptions::from_config(&config),
            config.client.connect_timeout(),
        ));
        let breakers = Arc::new(match self.breaker_events {
            Some(events) => CircuitBreakerRegistry::with_events(events),
            None => CircuitBreakerRegistry::new(),
        });

        let mut invoker = ClientInvoker::new(
            Arc::clone(&registry),
            config.client.clone(),
            Arc::clone(&dispatcher),
            Arc::clone(&discovery),
            Arc::clone(&clients),
        )
        .with_interceptors(self.interceptors)
        .with_breakers(breakers);
        let cache = self.cache.or_else(|| {
            config
                .caching
                .as_ref()
                .map(|caching| Arc::new(MemoryCache::new(caching.capacity)) as Arc<dyn Cache>)
        });
        if let Some(cache) = cache {
            invoker = invoker.with_cache(cache);
        }
        if let Some(balancer) = self.balancer {
            invoker = invoker.with_balancer(balancer);
        }

        let server = config.server.clone().map(|settings| {
            RemotingServer::new(settings, Arc::clone(&dispatcher), config.max_frame_length())
        });

        Ok(CourierNode {
            config,
            registry,
            invoker: Arc::new(invoker),
            discovery,
            clients,
            server,
            running: None,
            refresher: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

struct RunningServer {
    address: NodeAddress,
    controller: Arc<ShutdownController>,
    task: JoinHandle<anyhow::Result<()>>,
}

/// A configured process that can host and call routes.
pub struct CourierNode {
    config: CourierConfig,
    registry: Arc<RouteRegistry>,
    invoker: Arc<ClientInvoker>,
    discovery: Arc<dyn ServiceDiscovery>,
    clients: Arc<RemotingClientFactory>,
    server: Option<RemotingServer>,
    running: Option<RunningServer>,
    refresher: Option<StatusRefresher>,
}

impl CourierNode {
    pub fn builder(config: CourierConfig) -> CourierNodeBuilder {
        CourierNodeBuilder::new(config)
    }

    /// Shared handle for typed clients and direct invocation.
    #[must_use]
    pub fn invoker(&self) -> Arc<ClientInvoker> {
        Arc::clone(&self.invoker)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn discovery(&self) -> &Arc<dyn ServiceDiscovery> {
        &self.discovery
    }

    /// Address announced for local services, once started with a server.
    #[must_use]
    pub fn address(&self) -> Option<&NodeAddress> {
        self.running.as_ref().map(|r| &r.address)
    }

    /// Binds the server (if configured), announces every locally hosted
    /// service and starts the status refresher.
    ///
    /// Returns the announced address, or `None` for a client-only node.
    ///
    /// # Errors
    ///
    /// Fails if the listener cannot be bound or discovery rejects a
    /// registration.
    pub async fn start(&mut self) -> anyhow::Result<Option<NodeAddress>> {
        if let Some(mut server) = self.server.take() {
            let port = server.start().await?;
            let address = NodeAddress::new(self.advertised_host(), port);
            let controller = server.shutdown_controller();
            let task = tokio::spawn(server.serve(std::future::pending()));

            for service in self.local_services() {
                self.discovery.register(&service, address.clone()).await?;
            }
            info!(address = %address, "node serving");
            self.running = Some(RunningServer {
                address,
                controller,
                task,
            });
        }

        self.refresher = Some(StatusRefresher::start(
            Arc::clone(&self.discovery),
            std::time::Duration::from_millis(self.config.client.node_status_refresh_interval_ms),
        ));
        Ok(self.address().cloned())
    }

    /// Stops the refresher, withdraws local services, drains the server and
    /// closes every outbound connection.
    ///
    /// # Errors
    ///
    /// Returns the server's error if serving failed.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        if let Some(mut refresher) = self.refresher.take() {
            refresher.stop(self.config.client.refresh_stop_grace()).await;
        }

        let mut outcome = Ok(());
        if let Some(running) = self.running.take() {
            for service in self.local_services() {
                if let Err(err) = self.discovery.deregister(&service, &running.address).await {
                    warn!(service = %service, error = %err, "deregistration failed");
                }
            }
            running.controller.trigger_shutdown();
            outcome = match running.task.await {
                Ok(result) => result,
                Err(err) => Err(anyhow::anyhow!("server task failed: {err}")),
            };
        }

        self.clients.disconnect_all().await;
        info!("node stopped");
        outcome
    }

    fn local_services(&self) -> Vec<String> {
        self.registry
            .local_services()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Advertised host, falling back to the bind host; a wildcard bind host
    /// is announced as loopback.
    fn advertised_host(&self) -> String {
        let Some(settings) = self.config.server.as_ref() else {
            return "127.0.0.1".to_string();
        };
        match settings.advertised_host.as_deref() {
            Some(host) => host.to_string(),
            None if matches!(settings.host.as_str(), "0.0.0.0" | "::" | "") => {
                "127.0.0.1".to_string()
            }
            None => settings.host.clone(),
        }
    }
}

impl Drop for CourierNode {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.controller.trigger_shutdown();
        }
    }
}
