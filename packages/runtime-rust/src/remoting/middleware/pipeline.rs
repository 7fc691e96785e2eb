//! Composition of the inbound middleware around the dispatcher.

use std::sync::Arc;

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use crate::remoting::dispatcher::{DispatchService, Dispatcher};

/// The full inbound service stack.
pub type DispatchPipeline = LoadShedService<MetricsService<DispatchService>>;

/// Wraps the dispatcher with load shedding (outermost, so rejected calls do
/// no work) and then span metrics.
#[must_use]
pub fn build_dispatch_pipeline(dispatcher: Arc<Dispatcher>, max_concurrent: usize) -> DispatchPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(max_concurrent))
        .layer(MetricsLayer)
        .service(DispatchService::new(dispatcher))
}

#[cfg(test)]
mod tests {
    use courier_core::{InvokeMessage, Metadata, RemotingStatus, TransportMessage, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::interceptor::InterceptorSettings;
    use crate::registry::{handler_fn, InvokeArgs, MethodDefinition, RouteRegistryBuilder, ServiceDefinition};

    fn dispatcher() -> Arc<Dispatcher> {
        let mut builder = RouteRegistryBuilder::new();
        builder
            .add_service(&ServiceDefinition::new("Echo").method(
                MethodDefinition::new("Say").param("text", "String").handler(handler_fn(
                    |args: InvokeArgs, _meta| async move {
                        Ok::<_, anyhow::Error>(args.get::<String>(0)?)
                    },
                )),
            ))
            .unwrap();
        Arc::new(Dispatcher::new(
            Arc::new(builder.build()),
            InterceptorSettings::new(),
        ))
    }

    #[tokio::test]
    async fn routes_through_all_layers() {
        let svc = build_dispatch_pipeline(dispatcher(), 8);
        let result = svc
            .oneshot(TransportMessage::new(
                "a",
                InvokeMessage::new("echo/say", vec![Value::from("hi")], Metadata::new()),
            ))
            .await
            .unwrap();
        assert_eq!(result.value, Some(Value::from("hi")));
    }

    #[tokio::test]
    async fn unknown_route_is_not_an_error_at_this_layer() {
        let svc = build_dispatch_pipeline(dispatcher(), 8);
        let result = svc
            .oneshot(TransportMessage::new(
                "b",
                InvokeMessage::new("Echo/Shout", Vec::new(), Metadata::new()),
            ))
            .await
            .unwrap();
        assert_eq!(result.status, RemotingStatus::NotFound);
    }

    #[tokio::test]
    async fn zero_permits_sheds_everything() {
        let svc = build_dispatch_pipeline(dispatcher(), 0);
        let err = svc
            .oneshot(TransportMessage::new("c", InvokeMessage::default()))
            .await
            .unwrap_err();
        assert_eq!(err, crate::remoting::dispatcher::DispatchError::Overloaded);
    }
}
