//! Observability for the customer context.
//!
//! Structured `tracing` spans around key refreshes and customer operations,
//! plus atomic counters that callers can snapshot with
//! [`ContextMetrics::summary`].

mod metrics;
mod spans;

pub use metrics::{ContextMetrics, Counter, Histogram, MetricsSummary};
pub use spans::{OperationSpan, key_refresh_span};
