//! Metric instrument factories for outbox-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"outbox-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for outbox-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("outbox-rs")
}

/// Counter: invocations written to the outbox.
/// Labels: `target`.
pub fn enqueued() -> Counter<u64> {
    meter()
        .u64_counter("outbox.enqueued")
        .with_description("Number of invocations enqueued")
        .build()
}

/// Counter: claim attempts.
/// Labels: `result` ("acquired" | "lost").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("outbox.claims")
        .with_description("Number of claim attempts")
        .build()
}

/// Counter: outbox record status transitions.
/// Labels: `from`, `to`.
pub fn record_transitions() -> Counter<u64> {
    meter()
        .u64_counter("outbox.record.transitions")
        .with_description("Number of outbox record status transitions")
        .build()
}

/// Histogram: invocation duration in milliseconds.
/// Labels: `target`.
pub fn invocation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("outbox.invocation.duration_ms")
        .with_description("Invocation duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: records returned to pending or purged by housekeeping.
/// Labels: `operation` ("reset_stale" | "rearm" | "purge").
pub fn housekeeping() -> Counter<u64> {
    meter()
        .u64_counter("outbox.housekeeping")
        .with_description("Number of records touched by housekeeping")
        .build()
}
