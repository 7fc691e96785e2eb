//! Per-call state carried through the interceptor chain.

use std::fmt;
use std::sync::Arc;

use courier_core::{InvokeMessage, Metadata, Value};

use crate::registry::{MethodHandler, ServiceDescriptor};

/// Context for a single invocation.
///
/// Created fresh for every call and dropped when the call completes. Stages
/// may rewrite `args` and `meta` before calling the next stage.
#[derive(Clone)]
pub struct InterceptorContext {
    /// Route as spelled by the caller.
    pub route: String,
    pub args: Vec<Value>,
    pub meta: Metadata,
    descriptor: Arc<ServiceDescriptor>,
}

impl InterceptorContext {
    #[must_use]
    pub fn new(descriptor: Arc<ServiceDescriptor>, args: Vec<Value>, meta: Metadata) -> Self {
        Self {
            route: descriptor.route.clone(),
            args,
            meta,
            descriptor,
        }
    }

    /// The registered descriptor for the route being invoked.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    /// The local implementation, if this node hosts one.
    #[must_use]
    pub fn handler(&self) -> Option<&Arc<dyn MethodHandler>> {
        self.descriptor.handler.as_ref()
    }

    /// Builds the request body sent to a remote node.
    #[must_use]
    pub fn to_invoke_message(&self) -> InvokeMessage {
        InvokeMessage::new(self.route.clone(), self.args.clone(), self.meta.clone())
    }
}

impl fmt::Debug for InterceptorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorContext")
            .field("route", &self.route)
            .field("args", &self.args.len())
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}
