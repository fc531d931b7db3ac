//! Core data model.
//!
//! Event envelopes flow in from the hubs, connection state tracks each
//! adapter, jobs are what the scheduler runs, sync requests are what the host
//! picks up, and audit records are what destructive subtitle actions leave behind.

pub mod audit;
pub mod connection;
pub mod envelope;
pub mod job;
pub mod sync;

pub use connection::ConnectionState;
pub use envelope::{EventEnvelope, Payload, Topic};
