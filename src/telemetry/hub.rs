//! Hub traffic span helpers.
//!
//! One span per dispatched envelope, plus connection lifecycle events
//! recorded on each adapter's session span.

use tracing::Span;

/// Start a span covering the dispatch of one envelope.
///
/// The `hub.route` field is declared empty and filled in by
/// [`record_route`] once the dispatcher has decided.
pub fn start_dispatch_span(server: &str, topic: &str) -> Span {
    tracing::info_span!(
        "hub.dispatch",
        "hub.server" = server,
        "hub.topic" = topic,
        "hub.route" = tracing::field::Empty,
    )
}

/// Record the dispatcher's routing decision on a dispatch span.
pub fn record_route(span: &Span, route: &str) {
    span.record("hub.route", route);
}

/// Start a span for one adapter's connection session.
pub fn start_session_span(server: &str) -> Span {
    tracing::info_span!(
        "hub.session",
        "hub.server" = server,
        "hub.state" = tracing::field::Empty,
    )
}

/// Record a connection state transition on the session span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_connection_transition(span: &Span, from: &str, to: &str) {
    span.record("hub.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "connection_transition");
    });
}
