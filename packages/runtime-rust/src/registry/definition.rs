//! Declarative service definitions.
//!
//! A [`ServiceDefinition`] describes one interface: its route prefix, its
//! class-level interceptors and caching opt-out, and its methods. The registry
//! builder expands it into one registration per method.

use std::fmt;
use std::sync::Arc;

use super::descriptor::{MethodSignature, ParamInfo, ReturnKind};
use super::handler::MethodHandler;
use crate::breaker::{BreakerMarker, CircuitBreakerOverride};
use crate::caching::CachingMarker;
use crate::interceptor::{names, InterceptorRef};

// ---------------------------------------------------------------------------
// ServiceDefinition
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ServiceDefinition {
    pub(crate) name: String,
    pub(crate) prefix: Option<String>,
    pub(crate) server_interceptors: Vec<InterceptorRef>,
    pub(crate) client_interceptors: Vec<InterceptorRef>,
    pub(crate) caching_disabled: bool,
    pub(crate) methods: Vec<MethodDefinition>,
}

impl ServiceDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            server_interceptors: Vec::new(),
            client_interceptors: Vec::new(),
            caching_disabled: false,
            methods: Vec::new(),
        }
    }

    /// Route prefix for every method. Defaults to the service name.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Adds a class-level server interceptor.
    #[must_use]
    pub fn server_interceptor(mut self, interceptor: InterceptorRef) -> Self {
        self.server_interceptors.push(interceptor);
        self
    }

    /// Adds a class-level client interceptor.
    #[must_use]
    pub fn client_interceptor(mut self, interceptor: InterceptorRef) -> Self {
        self.client_interceptors.push(interceptor);
        self
    }

    /// Opts every method of this service out of result caching.
    #[must_use]
    pub fn disable_caching(mut self) -> Self {
        self.caching_disabled = true;
        self
    }

    #[must_use]
    pub fn method(mut self, method: MethodDefinition) -> Self {
        self.methods.push(method);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective route prefix.
    #[must_use]
    pub fn route_prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn methods(&self) -> &[MethodDefinition] {
        &self.methods
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("server_interceptors", &names(&self.server_interceptors))
            .field("client_interceptors", &names(&self.client_interceptors))
            .field("caching_disabled", &self.caching_disabled)
            .field("methods", &self.methods)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MethodDefinition
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MethodDefinition {
    pub(crate) name: String,
    pub(crate) route: Option<String>,
    pub(crate) signature: MethodSignature,
    pub(crate) handler: Option<Arc<dyn MethodHandler>>,
    pub(crate) server_interceptors: Vec<InterceptorRef>,
    pub(crate) client_interceptors: Vec<InterceptorRef>,
    pub(crate) breaker: BreakerMarker,
    pub(crate) caching: CachingMarker,
}

impl MethodDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            route: None,
            signature: MethodSignature::default(),
            handler: None,
            server_interceptors: Vec::new(),
            client_interceptors: Vec::new(),
            breaker: BreakerMarker::Inherit,
            caching: CachingMarker::Inherit,
        }
    }

    /// Route segment after the prefix. Defaults to the method name.
    #[must_use]
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.signature.params.push(ParamInfo::new(name, type_name));
        self
    }

    /// Marks the method as completing without a value.
    #[must_use]
    pub fn returns_unit(mut self) -> Self {
        self.signature.returns = ReturnKind::Unit;
        self
    }

    /// Binds the local implementation. Methods without a handler can only be
    /// called remotely from this node.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn MethodHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub fn server_interceptor(mut self, interceptor: InterceptorRef) -> Self {
        self.server_interceptors.push(interceptor);
        self
    }

    #[must_use]
    pub fn client_interceptor(mut self, interceptor: InterceptorRef) -> Self {
        self.client_interceptors.push(interceptor);
        self
    }

    #[must_use]
    pub fn circuit_breaker(mut self, settings: CircuitBreakerOverride) -> Self {
        self.breaker = BreakerMarker::Override(settings);
        self
    }

    #[must_use]
    pub fn disable_circuit_breaker(mut self) -> Self {
        self.breaker = BreakerMarker::Disabled;
        self
    }

    /// Custom cache key template (with `{0}`… slots) and/or expiry.
    #[must_use]
    pub fn caching(mut self, key: Option<&str>, expire_seconds: Option<u64>) -> Self {
        self.caching = CachingMarker::Override {
            key: key.map(str::to_string),
            expire_seconds,
        };
        self
    }

    #[must_use]
    pub fn disable_caching(mut self) -> Self {
        self.caching = CachingMarker::Disabled;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective route segment.
    #[must_use]
    pub fn route_segment(&self) -> &str {
        self.route.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Debug for MethodDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDefinition")
            .field("name", &self.name)
            .field("route", &self.route)
            .field("signature", &self.signature)
            .field("handler", &self.handler.is_some())
            .field("server_interceptors", &names(&self.server_interceptors))
            .field("client_interceptors", &names(&self.client_interceptors))
            .field("breaker", &self.breaker)
            .field("caching", &self.caching)
            .finish()
    }
}
