//! Interceptor chain shared by the client and server call paths.
//!
//! - [`context`]: per-call state handed to every stage
//! - [`pipeline`]: ordered execution engine with an index-based `Next` cursor
//! - [`caching`]: client-side result caching stage
//!
//! Interceptors are registered as factories so that every call gets its own
//! instances. Stateless interceptors can be shared with [`shared`]; stateful
//! ones are rebuilt per call with [`per_call`].

pub mod caching;
pub mod context;
pub mod pipeline;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::ServiceResult;

pub use caching::CachingInterceptor;
pub use context::InterceptorContext;
pub use pipeline::{Next, Pipeline, Terminal};

// ---------------------------------------------------------------------------
// Interceptor trait
// ---------------------------------------------------------------------------

/// One stage of the invocation pipeline.
///
/// A stage either calls `next.run(ctx)` to continue the chain or returns a
/// result directly, which short-circuits every later stage and the terminal.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, ctx: &mut InterceptorContext, next: Next<'_>) -> ServiceResult;
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Produces interceptor instances for each call.
pub trait InterceptorFactory: Send + Sync {
    /// Name used in logs and configuration tables.
    fn name(&self) -> &str;

    /// Returns the instance to use for one call.
    fn create(&self) -> Arc<dyn Interceptor>;
}

/// Shared handle to a registered interceptor factory.
pub type InterceptorRef = Arc<dyn InterceptorFactory>;

struct PerCallFactory<F> {
    name: String,
    make: F,
}

impl<F, I> InterceptorFactory for PerCallFactory<F>
where
    F: Fn() -> I + Send + Sync,
    I: Interceptor + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Arc<dyn Interceptor> {
        Arc::new((self.make)())
    }
}

struct SharedFactory {
    name: String,
    instance: Arc<dyn Interceptor>,
}

impl InterceptorFactory for SharedFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Arc<dyn Interceptor> {
        Arc::clone(&self.instance)
    }
}

/// Registers an interceptor that is constructed anew for every call.
pub fn per_call<I, F>(name: impl Into<String>, make: F) -> InterceptorRef
where
    F: Fn() -> I + Send + Sync + 'static,
    I: Interceptor + 'static,
{
    Arc::new(PerCallFactory {
        name: name.into(),
        make,
    })
}

/// Registers a stateless interceptor whose single instance serves every call.
pub fn shared<I>(name: impl Into<String>, interceptor: I) -> InterceptorRef
where
    I: Interceptor + 'static,
{
    Arc::new(SharedFactory {
        name: name.into(),
        instance: Arc::new(interceptor),
    })
}

// ---------------------------------------------------------------------------
// InterceptorSettings
// ---------------------------------------------------------------------------

/// Global interceptor lists, fixed at startup.
///
/// Global interceptors run before class- and method-level interceptors on
/// their respective side.
#[derive(Clone, Default)]
pub struct InterceptorSettings {
    client_global: Vec<InterceptorRef>,
    server_global: Vec<InterceptorRef>,
}

impl InterceptorSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a global client interceptor.
    #[must_use]
    pub fn with_client(mut self, interceptor: InterceptorRef) -> Self {
        self.client_global.push(interceptor);
        self
    }

    /// Appends a global server interceptor.
    #[must_use]
    pub fn with_server(mut self, interceptor: InterceptorRef) -> Self {
        self.server_global.push(interceptor);
        self
    }

    #[must_use]
    pub fn client_global(&self) -> &[InterceptorRef] {
        &self.client_global
    }

    #[must_use]
    pub fn server_global(&self) -> &[InterceptorRef] {
        &self.server_global
    }
}

impl fmt::Debug for InterceptorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorSettings")
            .field("client_global", &names(&self.client_global))
            .field("server_global", &names(&self.server_global))
            .finish()
    }
}

/// Names of the given factories, for `Debug` output and logs.
pub(crate) fn names(refs: &[InterceptorRef]) -> Vec<&str> {
    refs.iter().map(|r| r.name()).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct Passthrough;

    #[async_trait]
    impl Interceptor for Passthrough {
        async fn intercept(
            &self,
            ctx: &mut InterceptorContext,
            next: Next<'_>,
        ) -> ServiceResult {
            next.run(ctx).await
        }
    }

    #[test]
    fn per_call_builds_a_new_instance_each_time() {
        let built = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&built);
        let factory = per_call("passthrough", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Passthrough
        });

        let a = factory.create();
        let b = factory.create();
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(factory.name(), "passthrough");
    }

    #[test]
    fn shared_reuses_one_instance() {
        let factory = shared("passthrough", Passthrough);
        let a = factory.create();
        let b = factory.create();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn settings_keep_registration_order() {
        let settings = InterceptorSettings::new()
            .with_client(shared("a", Passthrough))
            .with_client(shared("b", Passthrough))
            .with_server(shared("s", Passthrough));

        assert_eq!(names(settings.client_global()), vec!["a", "b"]);
        assert_eq!(names(settings.server_global()), vec!["s"]);
    }
}
