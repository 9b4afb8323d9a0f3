//! Shared value types for the cost monitoring workspace.
//!
//! Everything here is plain data: metric samples produced by cost sources,
//! alerts emitted by the rule engine and anomaly detector, and the events
//! fanned out to subscribers.

pub mod id;
pub mod types;
