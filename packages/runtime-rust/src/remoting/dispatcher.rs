//! Server-side dispatch: route lookup, server pipeline, local invocation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use courier_core::{
    InvokeMessage, Metadata, RemotingStatus, ServiceResult, TransportMessage, Value,
};
use tower::Service;
use tracing::debug;

use crate::interceptor::{InterceptorContext, InterceptorSettings, Pipeline, Terminal};
use crate::registry::{InvokeArgs, RouteRegistry, ServiceDescriptor};

// ---------------------------------------------------------------------------
// LocalInvocation
// ---------------------------------------------------------------------------

/// Terminal stage that runs the descriptor's handler in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalInvocation;

#[async_trait]
impl Terminal for LocalInvocation {
    async fn invoke(&self, ctx: &mut InterceptorContext) -> ServiceResult {
        let Some(handler) = ctx.handler().cloned() else {
            return ServiceResult::failure(
                RemotingStatus::NotFound,
                format!("route {} has no local implementation", ctx.route),
            );
        };
        let args = InvokeArgs::new(std::mem::take(&mut ctx.args));
        match handler.invoke(args, &ctx.meta).await {
            Ok(value) => ServiceResult::ok(value),
            Err(err) => {
                debug!(route = %ctx.route, error = %err, "handler failed");
                ServiceResult::fault(format!("{err:#}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Resolves inbound requests against the registry and runs the server chain.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<RouteRegistry>,
    interceptors: InterceptorSettings,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<RouteRegistry>, interceptors: InterceptorSettings) -> Self {
        Self {
            registry,
            interceptors,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    /// Handles one inbound request.
    ///
    /// Unknown routes yield `NotFound`, an argument count that does not match
    /// the signature yields `Fault`. Never panics.
    pub async fn dispatch(&self, invoke: InvokeMessage) -> ServiceResult {
        let descriptor = match self.registry.lookup(&invoke.route) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                debug!(route = %invoke.route, "no such route");
                return ServiceResult::from(err);
            }
        };

        let expected = descriptor.signature.arity();
        if invoke.args.len() != expected {
            return ServiceResult::fault(format!(
                "route {} expects {expected} argument(s), got {}",
                descriptor.route,
                invoke.args.len()
            ));
        }

        self.invoke_local(descriptor, invoke.args, invoke.meta).await
    }

    /// Runs the server pipeline for an already resolved route.
    ///
    /// Also used by the client invoker when the route is served in-process.
    pub async fn invoke_local(
        &self,
        descriptor: Arc<ServiceDescriptor>,
        args: Vec<Value>,
        meta: Metadata,
    ) -> ServiceResult {
        let pipeline = Pipeline::assemble(
            self.interceptors.server_global(),
            &descriptor.server_interceptors,
        );
        let mut ctx = InterceptorContext::new(descriptor, args, meta);
        pipeline.execute(&mut ctx, &LocalInvocation).await
    }
}

// ---------------------------------------------------------------------------
// DispatchService
// ---------------------------------------------------------------------------

/// Errors raised by the dispatch middleware before the dispatcher runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("server overloaded")]
    Overloaded,
}

/// The dispatcher as a `tower::Service` over inbound frames.
#[derive(Debug, Clone)]
pub struct DispatchService {
    dispatcher: Arc<Dispatcher>,
}

impl DispatchService {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Service<TransportMessage<InvokeMessage>> for DispatchService {
    type Response = ServiceResult;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<ServiceResult, DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: TransportMessage<InvokeMessage>) -> Self::Future {
        let dispatcher = Arc::clone(&self.dispatcher);
        Box::pin(async move { Ok(dispatcher.dispatch(request.body).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tower::ServiceExt;

    use super::*;
    use crate::interceptor::{shared, Interceptor, Next};
    use crate::registry::{handler_fn, MethodDefinition, RouteRegistryBuilder, ServiceDefinition};

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Interceptor for Tag {
        async fn intercept(&self, ctx: &mut InterceptorContext, next: Next<'_>) -> ServiceResult {
            self.log.lock().push(self.name);
            next.run(ctx).await
        }
    }

    fn calc(log: &Arc<Mutex<Vec<&'static str>>>) -> ServiceDefinition {
        ServiceDefinition::new("Calc")
            .server_interceptor(shared(
                "class",
                Tag {
                    name: "class",
                    log: Arc::clone(log),
                },
            ))
            .method(
                MethodDefinition::new("Add")
                    .param("a", "i64")
                    .param("b", "i64")
                    .handler(handler_fn(|args: InvokeArgs, _meta| async move {
                        Ok::<_, anyhow::Error>(args.get::<i64>(0)? + args.get::<i64>(1)?)
                    })),
            )
            .method(
                MethodDefinition::new("Fail").handler(handler_fn(|_args, _meta| async move {
                    Err::<i64, _>(anyhow::anyhow!("division by zero"))
                })),
            )
            .method(
                MethodDefinition::new("Panic").handler(handler_fn(|_args, _meta| async move {
                    if true {
                        panic!("handler exploded");
                    }
                    Ok::<i64, anyhow::Error>(0)
                })),
            )
            .method(MethodDefinition::new("Remote"))
    }

    fn dispatcher(log: &Arc<Mutex<Vec<&'static str>>>) -> Dispatcher {
        let mut builder = RouteRegistryBuilder::new();
        builder.add_service(&calc(log)).unwrap();
        let settings = InterceptorSettings::new().with_server(shared(
            "global",
            Tag {
                name: "global",
                log: Arc::clone(log),
            },
        ));
        Dispatcher::new(Arc::new(builder.build()), settings)
    }

    fn add(a: i64, b: i64) -> InvokeMessage {
        InvokeMessage::new("Calc/Add", vec![Value::from(a), Value::from(b)], Metadata::new())
    }

    #[tokio::test]
    async fn dispatches_through_server_pipeline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = dispatcher(&log).dispatch(add(2, 3)).await;
        assert_eq!(result.value, Some(Value::from(5)));
        assert_eq!(*log.lock(), vec!["global", "class"]);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = dispatcher(&log)
            .dispatch(InvokeMessage::new("Calc/Mul", Vec::new(), Metadata::new()))
            .await;
        assert_eq!(result.status, RemotingStatus::NotFound);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn wrong_arity_is_a_fault() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = dispatcher(&log)
            .dispatch(InvokeMessage::new(
                "Calc/Add",
                vec![Value::from(1)],
                Metadata::new(),
            ))
            .await;
        assert_eq!(result.status, RemotingStatus::Fault);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn handler_error_becomes_fault() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = dispatcher(&log)
            .dispatch(InvokeMessage::new("Calc/Fail", Vec::new(), Metadata::new()))
            .await;
        assert_eq!(result.status, RemotingStatus::Fault);
        assert!(result.message.unwrap().contains("division by zero"));
    }

    #[tokio::test]
    async fn handler_panic_becomes_fault() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = dispatcher(&log)
            .dispatch(InvokeMessage::new("Calc/Panic", Vec::new(), Metadata::new()))
            .await;
        assert_eq!(result.status, RemotingStatus::Fault);
    }

    #[tokio::test]
    async fn route_without_handler_is_not_found() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = dispatcher(&log)
            .dispatch(InvokeMessage::new("Calc/Remote", Vec::new(), Metadata::new()))
            .await;
        assert_eq!(result.status, RemotingStatus::NotFound);
    }

    #[tokio::test]
    async fn dispatch_service_answers_via_oneshot() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let service = DispatchService::new(Arc::new(dispatcher(&log)));
        let result = service
            .oneshot(TransportMessage::new("id", add(4, 5)))
            .await
            .unwrap();
        assert_eq!(result.value, Some(Value::from(9)));
    }
}
