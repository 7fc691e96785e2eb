//! Per-call `invoke` spans for inbound route calls.
//!
//! Each dispatched `InvokeMessage` runs inside a span named after the wire
//! call: route, correlation id and argument count up front, then the elapsed
//! time and the reply status once the dispatcher answers.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use courier_core::{InvokeMessage, ServiceResult, TransportMessage};
use tower::{Layer, Service};
use tracing::{debug, field, info_span, Instrument, Span};

use crate::remoting::dispatcher::DispatchError;

type Request = TransportMessage<InvokeMessage>;

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Value recorded in the span's `outcome` field.
///
/// A reply records its `RemotingStatus`; a call refused before dispatch
/// records `rejected`.
fn outcome(result: &Result<ServiceResult, DispatchError>) -> String {
    match result {
        Ok(reply) => format!("{:?}", reply.status),
        Err(DispatchError::Overloaded) => "rejected".to_string(),
    }
}

impl<S> Service<Request> for MetricsService<S>
where
    S: Service<Request, Response = ServiceResult, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = ServiceResult;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<ServiceResult, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let span = info_span!(
            "invoke",
            route = %request.body.route,
            id = %request.id,
            args = request.body.args.len(),
            duration_ms = field::Empty,
            outcome = field::Empty,
        );
        let dispatch = self.inner.call(request);

        Box::pin(
            async move {
                let started = Instant::now();
                let result = dispatch.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = started.elapsed().as_millis() as u64;
                let outcome = outcome(&result);
                let span = Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome.as_str());
                debug!(duration_ms, outcome = %outcome, "route call finished");

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{Metadata, RemotingStatus, Value};
    use tower::ServiceExt;

    use super::*;

    /// Replies to every call with a fixed status, or refuses it.
    struct FixedReply(Option<RemotingStatus>);

    impl Service<Request> for FixedReply {
        type Response = ServiceResult;
        type Error = DispatchError;
        type Future =
            Pin<Box<dyn Future<Output = Result<ServiceResult, DispatchError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: Request) -> Self::Future {
            let reply = self.0.map(|status| ServiceResult::failure(status, "division by zero"));
            Box::pin(async move { reply.ok_or(DispatchError::Overloaded) })
        }
    }

    fn div() -> Request {
        TransportMessage::new(
            "7",
            InvokeMessage::new("Calc/Div", vec![Value::from(1), Value::from(0)], Metadata::new()),
        )
    }

    #[tokio::test]
    async fn reply_passes_through_untouched() {
        let result = MetricsLayer
            .layer(FixedReply(Some(RemotingStatus::Fault)))
            .oneshot(div())
            .await
            .unwrap();
        assert_eq!(result.status, RemotingStatus::Fault);
        assert_eq!(result.message.as_deref(), Some("division by zero"));
    }

    #[tokio::test]
    async fn refusal_passes_through_untouched() {
        let err = MetricsLayer.layer(FixedReply(None)).oneshot(div()).await.unwrap_err();
        assert_eq!(err, DispatchError::Overloaded);
    }

    #[test]
    fn outcome_names_the_reply_status() {
        assert_eq!(outcome(&Ok(ServiceResult::ok(Value::from(5)))), "Ok");
        assert_eq!(outcome(&Ok(ServiceResult::not_found("Calc/Mul"))), "NotFound");
        assert_eq!(outcome(&Err(DispatchError::Overloaded)), "rejected");
    }
}
