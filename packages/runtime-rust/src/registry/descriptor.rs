use std::fmt;
use std::sync::Arc;

use super::handler::MethodHandler;
use crate::breaker::CircuitBreakerConfig;
use crate::caching::CachingConfig;
use crate::interceptor::{names, InterceptorRef};

/// What a method returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnKind {
    /// Completes without a value. Never cached.
    Unit,
    #[default]
    Value,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamInfo {
    pub name: String,
    pub type_name: String,
}

impl ParamInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSignature {
    pub params: Vec<ParamInfo>,
    pub returns: ReturnKind,
}

impl MethodSignature {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Everything the runtime knows about one route.
///
/// Built once at startup by the registry builder and shared read-only.
#[derive(Clone)]
pub struct ServiceDescriptor {
    /// Route as registered; lookups ignore case.
    pub route: String,
    pub service: String,
    pub signature: MethodSignature,
    /// Absent on nodes that only call this route.
    pub handler: Option<Arc<dyn MethodHandler>>,
    /// Class-level interceptors followed by method-level ones.
    pub server_interceptors: Vec<InterceptorRef>,
    /// Class-level interceptors followed by method-level ones.
    pub client_interceptors: Vec<InterceptorRef>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub caching: Option<CachingConfig>,
}

impl ServiceDescriptor {
    /// A descriptor with no handler, interceptors, breaker or caching.
    #[must_use]
    pub fn new(
        route: impl Into<String>,
        service: impl Into<String>,
        signature: MethodSignature,
    ) -> Self {
        Self {
            route: route.into(),
            service: service.into(),
            signature,
            handler: None,
            server_interceptors: Vec::new(),
            client_interceptors: Vec::new(),
            circuit_breaker: None,
            caching: None,
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.handler.is_some()
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("route", &self.route)
            .field("service", &self.service)
            .field("signature", &self.signature)
            .field("handler", &self.handler.is_some())
            .field("server_interceptors", &names(&self.server_interceptors))
            .field("client_interceptors", &names(&self.client_interceptors))
            .field("circuit_breaker", &self.circuit_breaker)
            .field("caching", &self.caching)
            .finish()
    }
}
