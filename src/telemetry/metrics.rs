//! Metric instrument factories for hubbridge.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"hubbridge"` meter.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for hubbridge instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("hubbridge")
}

/// Counter: envelopes decoded off a hub.
/// Labels: `server`, `topic`.
pub fn events_received() -> Counter<u64> {
    meter()
        .u64_counter("hubbridge.events.received")
        .with_description("Number of hub events decoded into envelopes")
        .build()
}

/// Counter: dispatcher routing decisions.
/// Labels: `topic`, `route` ("series" | "episode" | "movie" | "ignored").
pub fn events_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("hubbridge.events.dispatched")
        .with_description("Number of envelopes routed by the dispatcher")
        .build()
}

/// Counter: connection lifecycle transitions.
/// Labels: `server`, `to`.
pub fn connection_transitions() -> Counter<u64> {
    meter()
        .u64_counter("hubbridge.connection.transitions")
        .with_description("Number of hub connection state transitions")
        .build()
}

/// Counter: reconnect attempts made by the retry policy.
/// Labels: `server`.
pub fn reconnect_attempts() -> Counter<u64> {
    meter()
        .u64_counter("hubbridge.connection.reconnect_attempts")
        .with_description("Number of hub reconnect attempts")
        .build()
}

/// Counter: audit table writes.
/// Labels: `table`, `result` ("ok" | "error").
pub fn audit_writes() -> Counter<u64> {
    meter()
        .u64_counter("hubbridge.audit.writes")
        .with_description("Number of audit log writes")
        .build()
}

/// Counter: scheduler enqueue calls.
/// Labels: `job`, `result` ("created" | "merged").
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("hubbridge.jobs.enqueued")
        .with_description("Number of scheduler enqueue requests")
        .build()
}
