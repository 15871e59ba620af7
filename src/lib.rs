//! kerb — a booking engine for time-sliced physical spaces (parking bays).
//!
//! Weekly open-hours with date exceptions, overlap-safe admission under a
//! per-space exclusivity section, and an ordered pricing rule chain frozen
//! into each booking at creation time. State is an in-memory aggregate per
//! space, made durable by an append-only event log.

pub mod calendar;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod wal;
