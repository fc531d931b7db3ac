//! # hubbridge
//!
//! Real-time bridge between media-catalog servers and a local subtitle manager.
//!
//! Listens to each server's push hub, turns catalog change notifications into
//! targeted resync requests, and keeps the subtitle audit trail (history,
//! blacklist) with change notifications for observers.

pub mod audit;
pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod hub;
pub mod model;
pub mod pathmap;
pub mod scheduler;
pub mod subtitles;
pub mod sync;
pub mod telemetry;
