//! Server-wide cap on route calls being dispatched at once.
//!
//! Every inbound `InvokeMessage` takes a permit before it reaches the
//! dispatcher and holds it until the handler's `ServiceResult` is ready. With
//! no permit left the call is refused with [`DispatchError::Overloaded`],
//! which the server turns into a `Fault("server overloaded")` reply carrying
//! the caller's correlation id.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use courier_core::{InvokeMessage, ServiceResult, TransportMessage};
use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::warn;

use crate::remoting::dispatcher::DispatchError;

type Request = TransportMessage<InvokeMessage>;

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

/// Shares one pool of dispatch permits across every connection of a server.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    permits: Arc<Semaphore>,
}

impl LoadShedLayer {
    /// `max_concurrent` comes from `ServerSettings::max_concurrent_calls`.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Permits not held by an in-flight call.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            permits: Arc::clone(&self.permits),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    permits: Arc<Semaphore>,
}

impl<S> Service<Request> for LoadShedService<S>
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
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            warn!(
                id = %request.id,
                route = %request.body.route,
                "no dispatch permit left, refusing call"
            );
            return Box::pin(async { Err(DispatchError::Overloaded) });
        };

        let dispatch = self.inner.call(request);
        Box::pin(async move {
            let _permit = permit;
            dispatch.await
        })
    }
}
