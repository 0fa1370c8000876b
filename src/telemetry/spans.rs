//! Span helpers for routing calls and complaint lifecycle changes.

use tracing::Span;

use crate::model::{Category, ComplaintId};

/// Start a span for one routing decision.
///
/// `routing.outcome` and `routing.department` are declared empty and
/// filled by [`record_routing_outcome`].
pub fn start_routing_span(category: Category) -> Span {
    tracing::info_span!(
        "routing.route",
        "routing.category" = category.as_str(),
        "routing.candidates" = tracing::field::Empty,
        "routing.outcome" = tracing::field::Empty,
        "routing.department" = tracing::field::Empty,
    )
}

pub fn record_candidates(span: &Span, count: usize) {
    span.record("routing.candidates", count as u64);
}

pub fn record_routing_outcome(span: &Span, outcome: &str, department: Option<&str>) {
    span.record("routing.outcome", outcome);
    if let Some(name) = department {
        span.record("routing.department", name);
    }
}

/// Start a span for a lifecycle operation on one complaint.
pub fn start_complaint_span(operation: &'static str, complaint_id: ComplaintId) -> Span {
    tracing::info_span!(
        "complaint.change",
        "complaint.operation" = operation,
        "complaint.id" = %complaint_id,
    )
}

/// Record a status transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
