//! Server-side method implementations.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use courier_core::codec::{from_value, to_value};
use courier_core::{Metadata, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A concrete method bound to a route.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Runs the method. Errors become `Fault` results for the caller.
    async fn invoke(&self, args: InvokeArgs, meta: &Metadata) -> anyhow::Result<Value>;
}

/// Positional call arguments with typed access.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeArgs(Vec<Value>);

impl InvokeArgs {
    #[must_use]
    pub fn new(args: Vec<Value>) -> Self {
        Self(args)
    }

    /// Decodes the argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no argument at `index` or it cannot be
    /// decoded as `T`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .0
            .get(index)
            .cloned()
            .with_context(|| format!("missing argument {index}"))?;
        from_value(value).with_context(|| format!("argument {index} has the wrong type"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut, R> MethodHandler for FnHandler<F>
where
    F: Fn(InvokeArgs, Metadata) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn invoke(&self, args: InvokeArgs, meta: &Metadata) -> anyhow::Result<Value> {
        let output = (self.0)(args, meta.clone()).await?;
        Ok(to_value(&output)?)
    }
}

/// Wraps an async closure as a [`MethodHandler`].
///
/// The closure's return value is encoded with the wire codec, so any
/// `Serialize` type works.
pub fn handler_fn<F, Fut, R>(f: F) -> Arc<dyn MethodHandler>
where
    F: Fn(InvokeArgs, Metadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    Arc::new(FnHandler(f))
}
