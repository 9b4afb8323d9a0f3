use crate::{AdapterError, CostSourceAdapter};
use chrono::{DateTime, Utc};
use costmon_common::types::{MetricSample, MonitoredTarget, TimeRange};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Outcome of one collection pass.
#[derive(Debug, Default)]
pub struct CollectionReport {
    /// One merged sample per target that at least one adapter answered for,
    /// ordered by target id.
    pub samples: Vec<MetricSample>,
    pub failures: Vec<AdapterError>,
    pub calls: usize,
}

/// Collects cost samples from every adapter for every target, concurrently
/// and under its own worker budget.
pub struct MetricCollector {
    adapters: Vec<Arc<dyn CostSourceAdapter>>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    call_timeout: Duration,
}

impl MetricCollector {
    pub fn new(
        adapters: Vec<Arc<dyn CostSourceAdapter>>,
        concurrency: usize,
        call_timeout: Duration,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            adapters,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            call_timeout,
        }
    }

    pub fn adapters(&self) -> &[Arc<dyn CostSourceAdapter>] {
        &self.adapters
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs one collection pass over `targets` for `range`.
    ///
    /// Dropping the returned future aborts every in-flight adapter call.
    pub async fn collect(&self, targets: &[MonitoredTarget], range: TimeRange) -> CollectionReport {
        let mut report = CollectionReport::default();
        if targets.is_empty() || self.adapters.is_empty() {
            return report;
        }

        let mut tasks = JoinSet::new();
        for (target_idx, target) in targets.iter().enumerate() {
            for (adapter_idx, adapter) in self.adapters.iter().enumerate() {
                let sem = Arc::clone(&self.semaphore);
                let adapter = Arc::clone(adapter);
                let target = target.clone();
                let call_timeout = self.call_timeout;

                tasks.spawn(async move {
                    let _permit = match sem.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            let err = AdapterError::Aborted("collector worker pool closed".to_string());
                            return (target_idx, adapter_idx, Err(err));
                        }
                    };

                    let result = match timeout(call_timeout, adapter.collect(&target, &range)).await {
                        Ok(result) => result,
                        Err(_) => Err(AdapterError::Timeout {
                            adapter: adapter.name().to_string(),
                            timeout: call_timeout,
                        }),
                    };
                    (target_idx, adapter_idx, result)
                });
                report.calls += 1;
            }
        }

        let mut results = Vec::with_capacity(report.calls);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(error = %e, "Cost source task panicked");
                    report.failures.push(AdapterError::Aborted(e.to_string()));
                }
            }
        }

        // Completion order is arbitrary; merge by target id, then adapter
        // registration order.
        results.sort_by(|a, b| {
            targets[a.0]
                .id
                .cmp(&targets[b.0].id)
                .then(a.1.cmp(&b.1))
        });

        let mut contributions: BTreeMap<&str, (&MonitoredTarget, Vec<MetricSample>)> = BTreeMap::new();
        for (target_idx, adapter_idx, result) in results {
            let target = &targets[target_idx];
            match result {
                Ok(samples) => {
                    contributions
                        .entry(target.id.as_str())
                        .or_insert_with(|| (target, Vec::new()))
                        .1
                        .extend(samples);
                }
                Err(e) => {
                    tracing::warn!(
                        adapter = self.adapters[adapter_idx].name(),
                        target_id = %target.id,
                        error = %e,
                        "Cost source call failed, skipping its contribution"
                    );
                    report.failures.push(e);
                }
            }
        }

        for (target, parts) in contributions.into_values() {
            if let Some(sample) = merge_samples(target, range.end, &parts) {
                report.samples.push(sample);
            }
        }

        tracing::debug!(
            calls = report.calls,
            samples = report.samples.len(),
            failures = report.failures.len(),
            "Collection pass finished"
        );
        report
    }
}

/// Folds per-adapter contributions into a single sample for `target`.
///
/// Costs add up; rates are averaged over the contributions that carry
/// them. Returns `None` when there is nothing to merge.
pub fn merge_samples(
    target: &MonitoredTarget,
    timestamp: DateTime<Utc>,
    parts: &[MetricSample],
) -> Option<MetricSample> {
    if parts.is_empty() {
        return None;
    }

    Some(MetricSample {
        timestamp,
        target_id: target.id.clone(),
        target_scope: target.scope,
        total_cost: sum_of(parts, |s| s.total_cost),
        hardware_cost: sum_of(parts, |s| s.hardware_cost),
        power_cost: sum_of(parts, |s| s.power_cost),
        maintenance_cost: sum_of(parts, |s| s.maintenance_cost),
        labor_cost: sum_of(parts, |s| s.labor_cost),
        utilization_rate: mean_of(parts, |s| s.utilization_rate),
        power_usage_effectiveness: mean_of(parts, |s| s.power_usage_effectiveness),
        cost_per_unit: mean_of(parts, |s| s.cost_per_unit),
        quality_score: mean_of(parts, |s| s.quality_score),
        budget_utilization: mean_of(parts, |s| s.budget_utilization),
    })
}

fn sum_of(parts: &[MetricSample], field: fn(&MetricSample) -> f64) -> f64 {
    parts.iter().map(field).sum()
}

fn mean_of(parts: &[MetricSample], field: fn(&MetricSample) -> Option<f64>) -> Option<f64> {
    let values: Vec<f64> = parts.iter().filter_map(field).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
