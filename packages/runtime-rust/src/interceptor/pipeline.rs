//! Ordered execution engine for interceptor chains.
//!
//! A [`Pipeline`] holds the instantiated stages for one call in execution
//! order (global, then class, then method). [`Next`] is a cursor over the
//! stages that have not run yet; when it runs out of stages it invokes the
//! [`Terminal`], which is either the local method invocation or the network
//! send.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::ServiceResult;
use futures_util::FutureExt;
use tracing::error;

use super::context::InterceptorContext;
use super::{Interceptor, InterceptorRef};

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

/// The action at the end of a chain.
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn invoke(&self, ctx: &mut InterceptorContext) -> ServiceResult;
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// Cursor over the stages that follow the current one.
///
/// `Next` is `Copy`: a stage that retries may run the rest of the chain more
/// than once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Interceptor>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    /// Creates a cursor over `stages` ending in `terminal`.
    #[must_use]
    pub fn new(stages: &'a [Arc<dyn Interceptor>], terminal: &'a dyn Terminal) -> Self {
        Self { stages, terminal }
    }

    /// Runs the next stage, or the terminal when no stages remain.
    pub async fn run(self, ctx: &mut InterceptorContext) -> ServiceResult {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    terminal: self.terminal,
                };
                stage.intercept(ctx, next).await
            }
            None => self.terminal.invoke(ctx).await,
        }
    }

    /// Number of stages left before the terminal.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The stages for one call, in execution order.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiates `global` followed by `route` interceptors.
    ///
    /// `route` is the descriptor's list, already ordered class-level first.
    #[must_use]
    pub fn assemble(global: &[InterceptorRef], route: &[InterceptorRef]) -> Self {
        let stages = global
            .iter()
            .chain(route.iter())
            .map(|factory| factory.create())
            .collect();
        Self { stages }
    }

    /// Adds a stage that runs before all current stages.
    pub fn prepend(&mut self, stage: Arc<dyn Interceptor>) {
        self.stages.insert(0, stage);
    }

    /// Adds a stage that runs after all current stages, just before the terminal.
    pub fn append(&mut self, stage: Arc<dyn Interceptor>) {
        self.stages.push(stage);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs the chain to completion.
    ///
    /// A panic in any stage or in the terminal is caught here and returned as
    /// a `Fault` result.
    pub async fn execute(
        &self,
        ctx: &mut InterceptorContext,
        terminal: &dyn Terminal,
    ) -> ServiceResult {
        let route = ctx.route.clone();
        let next = Next::new(&self.stages, terminal);
        match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(route = %route, panic = %message, "interceptor pipeline panicked");
                ServiceResult::fault(format!("unhandled fault in pipeline: {message}"))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
