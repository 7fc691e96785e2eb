//! Frame envelope and the client-to-server invocation payload.

use serde::{Deserialize, Serialize};

use crate::types::{Metadata, Value};

/// A correlated frame exchanged over a remoting connection.
///
/// The `id` pairs a request frame with its eventual response frame. The body is
/// an [`InvokeMessage`] on the way out and a
/// [`ServiceResult`](super::ServiceResult) on the way back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMessage<T> {
    pub id: String,
    pub body: T,
}

impl<T> TransportMessage<T> {
    #[must_use]
    pub fn new(id: impl Into<String>, body: T) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

/// A request to invoke one route on a remote node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeMessage {
    pub route: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub meta: Metadata,
}

impl InvokeMessage {
    #[must_use]
    pub fn new(route: impl Into<String>, args: Vec<Value>, meta: Metadata) -> Self {
        Self {
            route: route.into(),
            args,
            meta,
        }
    }
}
