//! Tower middleware for inbound calls.
//!
//! - [`load_shed`]: semaphore concurrency limit
//! - [`metrics`]: per-call `tracing` span with duration and outcome
//! - [`pipeline`]: composes the layers around the dispatcher

pub mod load_shed;
pub mod metrics;
pub mod pipeline;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_dispatch_pipeline, DispatchPipeline};
