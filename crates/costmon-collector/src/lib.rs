//! Cost sample collection for the monitoring loop.
//!
//! Each [`CostSourceAdapter`] wraps one domain calculator (hardware,
//! power/maintenance, labor, overhead) and returns already-computed totals
//! and rates for a target. The [`collector::MetricCollector`] fans calls out
//! over a bounded worker pool and merges the results into one
//! [`MetricSample`] per target, which the [`history::MetricHistory`] ring
//! buffer retains for the rule engine and anomaly detector.

pub mod collector;
pub mod error;
pub mod history;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use costmon_common::types::{CostCategory, MetricSample, MonitoredTarget, TimeRange};

pub use error::{AdapterError, Result};

/// A source of already-computed cost figures for one cost category.
///
/// Implementations are registered with the [`collector::MetricCollector`]
/// and the calculation orchestrator. Each call is independent: a failure
/// only removes this adapter's contribution for that target.
#[async_trait]
pub trait CostSourceAdapter: Send + Sync {
    /// Adapter name used in logs and warnings (e.g., `"hardware"`).
    fn name(&self) -> &str;

    /// The cost category this adapter computes.
    fn category(&self) -> CostCategory;

    /// Returns samples for `target` covering `range`. The `total_cost` of
    /// each sample is this adapter's share of the target's cost.
    ///
    /// # Errors
    ///
    /// Returns an [`AdapterError`] when the underlying calculator fails.
    async fn collect(&self, target: &MonitoredTarget, range: &TimeRange) -> Result<Vec<MetricSample>>;
}
