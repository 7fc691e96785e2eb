//! Route registry: the immutable map from route name to service descriptor.
//!
//! - [`definition`]: the declarative service/method table
//! - [`descriptor`]: the per-route record handed to the pipelines
//! - [`handler`]: server-side method implementations
//!
//! Registration happens on a [`RouteRegistryBuilder`] during startup.
//! [`RouteRegistryBuilder::build`] freezes it into a [`RouteRegistry`] that is
//! shared behind an `Arc` and read without locking.

pub mod definition;
pub mod descriptor;
pub mod handler;

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use courier_core::{join_route, RouteKey, RpcError};
use tracing::debug;

pub use definition::{MethodDefinition, ServiceDefinition};
pub use descriptor::{MethodSignature, ParamInfo, ReturnKind, ServiceDescriptor};
pub use handler::{handler_fn, InvokeArgs, MethodHandler};

use crate::breaker::{BreakerMarker, CircuitBreakerConfig, CircuitBreakerOptions};
use crate::caching::{CachingConfig, CachingMarker};
use crate::config::CachingOptions;
use crate::interceptor::InterceptorRef;

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Input for a single route.
#[derive(Clone)]
pub struct Registration {
    pub route: String,
    pub service: String,
    pub signature: MethodSignature,
    pub handler: Option<Arc<dyn MethodHandler>>,
    pub server_interceptors: Vec<InterceptorRef>,
    pub client_interceptors: Vec<InterceptorRef>,
    pub breaker: BreakerMarker,
    pub caching: CachingMarker,
    /// Class-level caching opt-out.
    pub caching_disabled: bool,
}

impl Registration {
    #[must_use]
    pub fn new(route: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            service: service.into(),
            signature: MethodSignature::default(),
            handler: None,
            server_interceptors: Vec::new(),
            client_interceptors: Vec::new(),
            breaker: BreakerMarker::Inherit,
            caching: CachingMarker::Inherit,
            caching_disabled: false,
        }
    }

    fn from_definition(service: &ServiceDefinition, method: &MethodDefinition) -> Self {
        let route = join_route(service.route_prefix(), method.route_segment());
        let concat = |class: &[InterceptorRef], own: &[InterceptorRef]| {
            class.iter().chain(own).cloned().collect::<Vec<_>>()
        };
        Self {
            route,
            service: service.name.clone(),
            signature: method.signature.clone(),
            handler: method.handler.clone(),
            server_interceptors: concat(&service.server_interceptors, &method.server_interceptors),
            client_interceptors: concat(&service.client_interceptors, &method.client_interceptors),
            breaker: method.breaker.clone(),
            caching: method.caching.clone(),
            caching_disabled: service.caching_disabled,
        }
    }
}

// ---------------------------------------------------------------------------
// RouteRegistryBuilder
// ---------------------------------------------------------------------------

/// Mutable registry used during startup.
#[derive(Default)]
pub struct RouteRegistryBuilder {
    breaker_defaults: Option<CircuitBreakerOptions>,
    caching: Option<CachingOptions>,
    routes: HashMap<RouteKey, Arc<ServiceDescriptor>>,
}

impl RouteRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Global breaker defaults applied to every method that does not opt out.
    #[must_use]
    pub fn with_circuit_breaker(mut self, defaults: Option<CircuitBreakerOptions>) -> Self {
        self.breaker_defaults = defaults;
        self
    }

    /// Global caching settings. Without them no route is cached.
    #[must_use]
    pub fn with_caching(mut self, caching: Option<CachingOptions>) -> Self {
        self.caching = caching;
        self
    }

    /// Registers one route.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateRoute`] if the route is already registered
    /// under any casing. The existing entry is left untouched.
    pub fn register(&mut self, registration: Registration) -> Result<Arc<ServiceDescriptor>, RpcError> {
        let key = RouteKey::new(&registration.route);
        let Entry::Vacant(slot) = self.routes.entry(key) else {
            return Err(RpcError::DuplicateRoute {
                route: registration.route,
            });
        };

        let circuit_breaker =
            CircuitBreakerConfig::resolve(self.breaker_defaults.as_ref(), &registration.breaker);
        let cacheable =
            registration.signature.returns == ReturnKind::Value && !registration.caching_disabled;
        let caching = if cacheable {
            CachingConfig::resolve(
                self.caching.as_ref(),
                &registration.route,
                registration.signature.arity(),
                &registration.caching,
            )
        } else {
            None
        };

        debug!(
            route = %registration.route,
            service = %registration.service,
            local = registration.handler.is_some(),
            breaker = circuit_breaker.is_some(),
            caching = caching.is_some(),
            "registered route"
        );

        let descriptor = Arc::new(ServiceDescriptor {
            route: registration.route,
            service: registration.service,
            signature: registration.signature,
            handler: registration.handler,
            server_interceptors: registration.server_interceptors,
            client_interceptors: registration.client_interceptors,
            circuit_breaker,
            caching,
        });
        slot.insert(Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Registers every method of `definition`.
    ///
    /// Route = `{prefix}/{method route}`. Interceptor lists are the class-level
    /// entries followed by the method-level ones.
    ///
    /// # Errors
    ///
    /// Stops at the first duplicate route. Methods registered before it stay
    /// registered.
    pub fn add_service(&mut self, definition: &ServiceDefinition) -> Result<(), RpcError> {
        for method in &definition.methods {
            self.register(Registration::from_definition(definition, method))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn build(self) -> RouteRegistry {
        RouteRegistry {
            routes: self.routes,
        }
    }
}

// ---------------------------------------------------------------------------
// RouteRegistry
// ---------------------------------------------------------------------------

/// Frozen route table.
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: HashMap<RouteKey, Arc<ServiceDescriptor>>,
}

impl RouteRegistry {
    /// Finds the descriptor for `route`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NotFoundRoute`] if nothing is registered under it.
    pub fn lookup(&self, route: &str) -> Result<Arc<ServiceDescriptor>, RpcError> {
        self.routes
            .get(&RouteKey::new(route))
            .cloned()
            .ok_or_else(|| RpcError::NotFoundRoute {
                route: route.to_string(),
            })
    }

    pub fn routes(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.routes.values()
    }

    /// Names of services with at least one local handler, sorted.
    #[must_use]
    pub fn local_services(&self) -> BTreeSet<&str> {
        self.routes
            .values()
            .filter(|d| d.is_local())
            .map(|d| d.service.as_str())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use courier_core::ServiceResult;

    use super::*;
    use crate::breaker::CircuitBreakerOverride;
    use crate::interceptor::{names, shared, Interceptor, InterceptorContext, Next};

    struct Named;

    #[async_trait]
    impl Interceptor for Named {
        async fn intercept(&self, ctx: &mut InterceptorContext, next: Next<'_>) -> ServiceResult {
            next.run(ctx).await
        }
    }

    fn add_handler() -> Arc<dyn MethodHandler> {
        handler_fn(|args: InvokeArgs, _meta| async move {
            Ok::<_, anyhow::Error>(args.get::<i64>(0)? + args.get::<i64>(1)?)
        })
    }

    fn calc() -> ServiceDefinition {
        ServiceDefinition::new("Calc")
            .server_interceptor(shared("class-server", Named))
            .client_interceptor(shared("class-client", Named))
            .method(
                MethodDefinition::new("Add")
                    .param("a", "i64")
                    .param("b", "i64")
                    .handler(add_handler())
                    .server_interceptor(shared("method-server", Named)),
            )
            .method(MethodDefinition::new("Reset").returns_unit())
    }

    #[test]
    fn lookup_returns_registered_descriptor() {
        let mut builder = RouteRegistryBuilder::new();
        builder.add_service(&calc()).unwrap();
        let registry = builder.build();

        let add = registry.lookup("Calc/Add").unwrap();
        assert_eq!(add.route, "Calc/Add");
        assert_eq!(add.service, "Calc");
        assert_eq!(add.signature.arity(), 2);
        assert!(add.is_local());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn lookup_ignores_case() {
        let mut builder = RouteRegistryBuilder::new();
        builder.add_service(&calc()).unwrap();
        let registry = builder.build();
        assert_eq!(registry.lookup("calc/add").unwrap().route, "Calc/Add");
    }

    #[test]
    fn lookup_of_unknown_route_fails() {
        let registry = RouteRegistryBuilder::new().build();
        let err = registry.lookup("Calc/Mul").unwrap_err();
        assert_eq!(
            err,
            RpcError::NotFoundRoute {
                route: "Calc/Mul".to_string()
            }
        );
    }

    #[test]
    fn duplicate_route_fails_and_keeps_original() {
        let mut builder = RouteRegistryBuilder::new();
        let mut first = Registration::new("Calc/Add", "Calc");
        first.handler = Some(add_handler());
        builder.register(first).unwrap();

        let err = builder
            .register(Registration::new("CALC/add", "Other"))
            .unwrap_err();
        assert!(matches!(err, RpcError::DuplicateRoute { route } if route == "CALC/add"));

        let registry = builder.build();
        let kept = registry.lookup("Calc/Add").unwrap();
        assert_eq!(kept.service, "Calc");
        assert!(kept.is_local());
    }

    #[test]
    fn interceptors_are_class_then_method() {
        let mut builder = RouteRegistryBuilder::new();
        builder.add_service(&calc()).unwrap();
        let registry = builder.build();

        let add = registry.lookup("Calc/Add").unwrap();
        assert_eq!(
            names(&add.server_interceptors),
            vec!["class-server", "method-server"]
        );
        assert_eq!(names(&add.client_interceptors), vec!["class-client"]);
    }

    #[test]
    fn prefix_and_route_override_build_the_route() {
        let definition = ServiceDefinition::new("Calc")
            .prefix("/api/math/")
            .method(MethodDefinition::new("Add").route("plus"));
        let mut builder = RouteRegistryBuilder::new();
        builder.add_service(&definition).unwrap();
        let registry = builder.build();
        assert!(registry.lookup("api/math/plus").is_ok());
    }

    #[test]
    fn breaker_resolution_follows_markers() {
        let defaults = CircuitBreakerOptions {
            timeout: Duration::from_millis(300),
            ..CircuitBreakerOptions::default()
        };
        let definition = ServiceDefinition::new("Calc")
            .method(MethodDefinition::new("Add"))
            .method(MethodDefinition::new("Sub").disable_circuit_breaker())
            .method(
                MethodDefinition::new("Mul")
                    .circuit_breaker(CircuitBreakerOverride::new().retry(0)),
            );
        let mut builder = RouteRegistryBuilder::new().with_circuit_breaker(Some(defaults));
        builder.add_service(&definition).unwrap();
        let registry = builder.build();

        let add = registry.lookup("Calc/Add").unwrap();
        assert_eq!(
            add.circuit_breaker.as_ref().unwrap().timeout,
            Duration::from_millis(300)
        );
        assert!(registry.lookup("Calc/Sub").unwrap().circuit_breaker.is_none());
        let mul = registry.lookup("Calc/Mul").unwrap();
        let mul_breaker = mul.circuit_breaker.as_ref().unwrap();
        assert_eq!(mul_breaker.retry, 0);
        assert_eq!(mul_breaker.timeout, Duration::from_millis(300));
    }

    #[test]
    fn caching_only_for_value_returning_methods_not_opted_out() {
        let mut builder =
            RouteRegistryBuilder::new().with_caching(Some(CachingOptions::default()));
        builder.add_service(&calc()).unwrap();
        builder
            .add_service(
                &ServiceDefinition::new("Clock")
                    .disable_caching()
                    .method(MethodDefinition::new("Now")),
            )
            .unwrap();
        builder
            .add_service(
                &ServiceDefinition::new("User")
                    .method(MethodDefinition::new("Get").param("id", "String").disable_caching()),
            )
            .unwrap();
        let registry = builder.build();

        assert!(registry.lookup("Calc/Add").unwrap().caching.is_some());
        assert!(registry.lookup("Calc/Reset").unwrap().caching.is_none());
        assert!(registry.lookup("Clock/Now").unwrap().caching.is_none());
        assert!(registry.lookup("User/Get").unwrap().caching.is_none());
    }

    #[test]
    fn local_services_lists_services_with_handlers() {
        let mut builder = RouteRegistryBuilder::new();
        builder.add_service(&calc()).unwrap();
        builder
            .add_service(&ServiceDefinition::new("Remote").method(MethodDefinition::new("Ping")))
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.local_services().into_iter().collect::<Vec<_>>(), vec!["Calc"]);
    }
}
