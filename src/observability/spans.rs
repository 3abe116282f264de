//! Structured span definitions for tracing.

use std::time::Instant;

use tracing::{Level, Span, field, span};

/// Span for one ephemeral key refresh cycle.
pub fn key_refresh_span(provider: &str, cycle: u64) -> Span {
    span!(
        Level::INFO,
        "ephemeral_key.refresh",
        provider = provider,
        cycle = cycle,
        key_id = field::Empty,
        subject_id = field::Empty,
    )
}

/// Span for one customer operation, recording retries and latency.
pub struct OperationSpan {
    span: Span,
    start: Instant,
}

impl OperationSpan {
    pub fn new(operation: &'static str) -> Self {
        let span = span!(
            Level::INFO,
            "customer.operation",
            operation = operation,
            cache_hit = field::Empty,
            auth_retried = field::Empty,
            is_error = field::Empty,
            latency_ms = field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn record_cache_hit(&self, hit: bool) {
        self.span.record("cache_hit", hit);
    }

    pub fn record_auth_retry(&self) {
        self.span.record("auth_retried", true);
    }

    pub fn finish(self, is_error: bool) {
        let latency_ms = self.start.elapsed().as_millis() as u64;
        self.span.record("is_error", is_error);
        self.span.record("latency_ms", latency_ms);
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}
