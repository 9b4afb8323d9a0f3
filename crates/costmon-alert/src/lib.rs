//! Alert evaluation for collected cost samples.
//!
//! Two independent producers emit [`Alert`]s from the same sample history:
//!
//! - [`engine::AlertRuleEngine`] runs registered threshold rules through a
//!   per-rule state machine (consecutive-breach counting, suppression
//!   windows, optional auto-recovery).
//! - [`anomaly::AnomalyDetector`] applies fixed statistical heuristics (cost
//!   spikes, efficiency drops, low utilization) over sliding windows.
//!
//! Emitted alerts live in the [`store::AlertStore`], which enforces at most
//! one active alert per (rule, target) pair and owns the acknowledge and
//! resolve transitions.
//!
//! [`Alert`]: costmon_common::types::Alert

pub mod anomaly;
pub mod engine;
pub mod error;
pub mod rule;
pub mod store;

#[cfg(test)]
mod tests;

pub use error::{AlertError, Result};
