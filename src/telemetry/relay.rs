//! Relay span helpers.
//!
//! Provides span creation and status-transition recording for outbox
//! records flowing through the relay.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one record's claim → invoke → resolve sequence.
///
/// The `outbox.status` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_relay_span(target: &str, method: &str, record_id: &Uuid) -> Span {
    tracing::info_span!(
        "outbox.relay",
        "outbox.target" = target,
        "outbox.method" = method,
        "outbox.id" = %record_id,
        "outbox.status" = tracing::field::Empty,
    )
}

/// Record a status transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("outbox.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
