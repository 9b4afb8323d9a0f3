use crate::collector::{merge_samples, MetricCollector};
use crate::history::MetricHistory;
use crate::{AdapterError, CostSourceAdapter, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use costmon_common::types::{CostCategory, MetricSample, MonitoredTarget, TargetScope, TimeRange};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct FixedSource {
    name: &'static str,
    category: CostCategory,
    cost: f64,
    utilization: Option<f64>,
}

#[async_trait]
impl CostSourceAdapter for FixedSource {
    fn name(&self) -> &str {
        self.name
    }

    fn category(&self) -> CostCategory {
        self.category
    }

    async fn collect(&self, target: &MonitoredTarget, range: &TimeRange) -> Result<Vec<MetricSample>> {
        let mut sample = MetricSample {
            total_cost: self.cost,
            utilization_rate: self.utilization,
            ..MetricSample::empty(target.id.clone(), target.scope, range.end)
        };
        match self.category {
            CostCategory::Hardware => sample.hardware_cost = self.cost,
            CostCategory::PowerMaintenance => sample.power_cost = self.cost,
            CostCategory::Labor => sample.labor_cost = self.cost,
            CostCategory::Overhead => {}
        }
        Ok(vec![sample])
    }
}

struct FailingSource;

#[async_trait]
impl CostSourceAdapter for FailingSource {
    fn name(&self) -> &str {
        "labor"
    }

    fn category(&self) -> CostCategory {
        CostCategory::Labor
    }

    async fn collect(&self, target: &MonitoredTarget, _range: &TimeRange) -> Result<Vec<MetricSample>> {
        Err(AdapterError::Failed {
            adapter: "labor".into(),
            target: target.id.clone(),
            message: "payroll export missing".into(),
        })
    }
}

struct SlowSource;

#[async_trait]
impl CostSourceAdapter for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }

    fn category(&self) -> CostCategory {
        CostCategory::Overhead
    }

    async fn collect(&self, _target: &MonitoredTarget, _range: &TimeRange) -> Result<Vec<MetricSample>> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

/// Records the highest number of calls running at once.
struct GaugedSource {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl CostSourceAdapter for GaugedSource {
    fn name(&self) -> &str {
        "gauged"
    }

    fn category(&self) -> CostCategory {
        CostCategory::Hardware
    }

    async fn collect(&self, target: &MonitoredTarget, range: &TimeRange) -> Result<Vec<MetricSample>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![MetricSample {
            total_cost: 1.0,
            ..MetricSample::empty(target.id.clone(), target.scope, range.end)
        }])
    }
}

fn targets(ids: &[&str]) -> Vec<MonitoredTarget> {
    ids.iter()
        .map(|id| MonitoredTarget::new(*id, TargetScope::Asset))
        .collect()
}

fn tick_range() -> TimeRange {
    TimeRange::trailing(Duration::minutes(1), Utc::now())
}

#[tokio::test]
async fn collect_merges_adapters_per_target_in_target_order() {
    let adapters: Vec<Arc<dyn CostSourceAdapter>> = vec![
        Arc::new(FixedSource {
            name: "hardware",
            category: CostCategory::Hardware,
            cost: 100.0,
            utilization: Some(0.8),
        }),
        Arc::new(FixedSource {
            name: "power",
            category: CostCategory::PowerMaintenance,
            cost: 20.0,
            utilization: Some(0.4),
        }),
    ];
    let collector = MetricCollector::new(adapters, 4, std::time::Duration::from_secs(5));

    let report = collector.collect(&targets(&["gpu-02", "gpu-01"]), tick_range()).await;

    assert_eq!(report.calls, 4);
    assert!(report.failures.is_empty());
    let ids: Vec<&str> = report.samples.iter().map(|s| s.target_id.as_str()).collect();
    assert_eq!(ids, vec!["gpu-01", "gpu-02"]);

    let sample = &report.samples[0];
    assert_eq!(sample.total_cost, 120.0);
    assert_eq!(sample.hardware_cost, 100.0);
    assert_eq!(sample.power_cost, 20.0);
    let utilization = sample.utilization_rate.expect("utilization reported");
    assert!((utilization - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn failing_adapter_only_drops_its_own_contribution() {
    let adapters: Vec<Arc<dyn CostSourceAdapter>> = vec![
        Arc::new(FixedSource {
            name: "hardware",
            category: CostCategory::Hardware,
            cost: 50.0,
            utilization: None,
        }),
        Arc::new(FailingSource),
    ];
    let collector = MetricCollector::new(adapters, 2, std::time::Duration::from_secs(5));

    let report = collector.collect(&targets(&["gpu-01"]), tick_range()).await;

    assert_eq!(report.samples.len(), 1);
    assert_eq!(report.samples[0].total_cost, 50.0);
    assert_eq!(report.samples[0].labor_cost, 0.0);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0], AdapterError::Failed { .. }));
}

#[tokio::test]
async fn target_with_no_successful_adapter_yields_no_sample() {
    let adapters: Vec<Arc<dyn CostSourceAdapter>> = vec![Arc::new(FailingSource)];
    let collector = MetricCollector::new(adapters, 2, std::time::Duration::from_secs(5));

    let report = collector.collect(&targets(&["gpu-01", "gpu-02"]), tick_range()).await;

    assert!(report.samples.is_empty());
    assert_eq!(report.failures.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn hung_adapter_is_cut_off_by_call_timeout() {
    let adapters: Vec<Arc<dyn CostSourceAdapter>> = vec![
        Arc::new(SlowSource),
        Arc::new(FixedSource {
            name: "hardware",
            category: CostCategory::Hardware,
            cost: 10.0,
            utilization: None,
        }),
    ];
    let collector = MetricCollector::new(adapters, 2, std::time::Duration::from_secs(2));

    let report = collector.collect(&targets(&["gpu-01"]), tick_range()).await;

    assert_eq!(report.samples.len(), 1);
    assert_eq!(report.samples[0].total_cost, 10.0);
    assert!(matches!(report.failures[0], AdapterError::Timeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn collection_respects_worker_budget() {
    let source = Arc::new(GaugedSource {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let adapters: Vec<Arc<dyn CostSourceAdapter>> = vec![source.clone()];
    let collector = MetricCollector::new(adapters, 2, std::time::Duration::from_secs(5));

    let ids = ["a", "b", "c", "d", "e", "f"];
    let report = collector.collect(&targets(&ids), tick_range()).await;

    assert_eq!(report.samples.len(), 6);
    assert!(source.peak.load(Ordering::SeqCst) <= 2);
}

#[test]
fn merge_of_nothing_is_none() {
    let target = MonitoredTarget::new("gpu-01", TargetScope::Asset);
    assert!(merge_samples(&target, Utc::now(), &[]).is_none());
}

fn sample_at(target: &str, cost: f64, secs_ago: i64) -> MetricSample {
    MetricSample {
        total_cost: cost,
        ..MetricSample::empty(target, TargetScope::Asset, Utc::now() - Duration::seconds(secs_ago))
    }
}

#[test]
fn history_evicts_oldest_when_full() {
    let history = MetricHistory::new(3, Duration::hours(1));
    let evicted = history.append(vec![
        sample_at("gpu-01", 1.0, 40),
        sample_at("gpu-01", 2.0, 30),
        sample_at("gpu-01", 3.0, 20),
        sample_at("gpu-01", 4.0, 10),
    ]);

    assert_eq!(evicted, 1);
    let costs: Vec<f64> = history.snapshot().iter().map(|s| s.total_cost).collect();
    assert_eq!(costs, vec![2.0, 3.0, 4.0]);
}

#[test]
fn history_drops_samples_past_retention() {
    let history = MetricHistory::new(100, Duration::minutes(5));
    history.append(vec![
        sample_at("gpu-01", 1.0, 600),
        sample_at("gpu-01", 2.0, 120),
    ]);

    assert_eq!(history.evict(Utc::now()), 1);
    assert_eq!(history.len(), 1);
}

#[test]
fn history_latest_per_target() {
    let history = MetricHistory::new(100, Duration::hours(1));
    history.append(vec![
        sample_at("gpu-01", 1.0, 60),
        sample_at("gpu-02", 5.0, 60),
        sample_at("gpu-01", 2.0, 0),
    ]);

    let latest = history.latest_per_target();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest["gpu-01"].total_cost, 2.0);
    assert_eq!(latest["gpu-02"].total_cost, 5.0);
}
