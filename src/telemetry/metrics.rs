//! Metric instrument factories for cityfix.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"cityfix"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for cityfix instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("cityfix")
}

/// Counter: complaints filed.
/// Labels: `category`.
pub fn complaints_filed() -> Counter<u64> {
    meter()
        .u64_counter("cityfix.complaint.filed")
        .with_description("Number of complaints filed")
        .build()
}

/// Counter: complaint status transitions.
/// Labels: `from`, `to`.
pub fn complaint_transitions() -> Counter<u64> {
    meter()
        .u64_counter("cityfix.complaint.transitions")
        .with_description("Number of complaint status transitions")
        .build()
}

/// Counter: routing decisions.
/// Labels: `category`, `outcome` ("routed" | "fallback" | "unassigned").
pub fn routing_decisions() -> Counter<u64> {
    meter()
        .u64_counter("cityfix.routing.decisions")
        .with_description("Number of routing decisions by outcome")
        .build()
}

/// Counter: workload ledger updates.
/// Labels: `direction` ("increment" | "decrement").
pub fn workload_updates() -> Counter<u64> {
    meter()
        .u64_counter("cityfix.workload.updates")
        .with_description("Number of department workload updates")
        .build()
}

/// Counter: events published.
/// Labels: `topic`, `result` ("ok" | "error").
pub fn events_published() -> Counter<u64> {
    meter()
        .u64_counter("cityfix.events.published")
        .with_description("Number of domain events published")
        .build()
}

/// Counter: events consumed by the relay.
/// Labels: `topic`, `result` ("ok" | "error" | "unknown").
pub fn events_consumed() -> Counter<u64> {
    meter()
        .u64_counter("cityfix.events.consumed")
        .with_description("Number of domain events dispatched to handlers")
        .build()
}

/// Counter: storage call retries.
/// Labels: `operation`.
pub fn storage_retries() -> Counter<u64> {
    meter()
        .u64_counter("cityfix.storage.retries")
        .with_description("Number of retried storage calls")
        .build()
}

/// Counter: queue-level operations (send, read, archive, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("cityfix.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("cityfix.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
