#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use costmon_collector::{CostSourceAdapter, Result as AdapterResult};
use costmon_common::types::{
    CostCategory, MetricSample, MonitoredTarget, MonitoringEvent, TargetScope, TimeRange,
};
use costmon_notify::Subscription;
use costmon_server::config::{MonitorConfig, TargetConfig};
use costmon_server::state::AppState;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reports the next scripted total cost on every call; the last value
/// repeats once the script runs out.
pub struct ScriptedSource {
    values: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(values: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(values.iter().copied().collect()),
            last: Mutex::new(0.0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CostSourceAdapter for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn category(&self) -> CostCategory {
        CostCategory::Hardware
    }

    async fn collect(&self, target: &MonitoredTarget, range: &TimeRange) -> AdapterResult<Vec<MetricSample>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.values.lock().expect("script lock").pop_front();
        let mut last = self.last.lock().expect("last lock");
        if let Some(value) = next {
            *last = value;
        }
        Ok(vec![MetricSample {
            total_cost: *last,
            hardware_cost: *last,
            ..MetricSample::empty(target.id.clone(), target.scope, range.end)
        }])
    }
}

/// Panics on its first call, then reports `cost` on every later one.
pub struct FlakySource {
    cost: f64,
    calls: AtomicUsize,
}

impl FlakySource {
    pub fn new(cost: f64) -> Arc<Self> {
        Arc::new(Self {
            cost,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CostSourceAdapter for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }

    fn category(&self) -> CostCategory {
        CostCategory::Hardware
    }

    async fn collect(&self, target: &MonitoredTarget, range: &TimeRange) -> AdapterResult<Vec<MetricSample>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("billing export returned a truncated page");
        }
        Ok(vec![MetricSample {
            total_cost: self.cost,
            hardware_cost: self.cost,
            ..MetricSample::empty(target.id.clone(), target.scope, range.end)
        }])
    }
}

/// Never answers.
pub struct HangingSource;

#[async_trait]
impl CostSourceAdapter for HangingSource {
    fn name(&self) -> &str {
        "hanging"
    }

    fn category(&self) -> CostCategory {
        CostCategory::Labor
    }

    async fn collect(&self, _target: &MonitoredTarget, _range: &TimeRange) -> AdapterResult<Vec<MetricSample>> {
        std::future::pending().await
    }
}

/// Config for the given asset targets with built-in rule seeding off.
pub fn test_config(targets: &[&str]) -> MonitorConfig {
    MonitorConfig {
        seed_default_rules: false,
        targets: targets
            .iter()
            .map(|id| TargetConfig {
                id: (*id).to_string(),
                scope: TargetScope::Asset,
            })
            .collect(),
        ..MonitorConfig::default()
    }
}

pub fn build_state(config: MonitorConfig, adapters: Vec<Arc<dyn CostSourceAdapter>>) -> AppState {
    costmon_common::id::init(1, 1);
    AppState::build(config, adapters)
}

pub fn cost_sample(target_id: &str, total_cost: f64, at: DateTime<Utc>) -> MetricSample {
    MetricSample {
        total_cost,
        ..MetricSample::empty(target_id, TargetScope::Asset, at)
    }
}

/// Waits for the next event, failing after `secs` seconds.
pub async fn next_event(subscription: &mut Subscription, secs: u64) -> Result<MonitoringEvent> {
    tokio::time::timeout(Duration::from_secs(secs), subscription.recv())
        .await
        .map_err(|_| anyhow!("no event within {secs}s"))?
        .ok_or_else(|| anyhow!("subscription closed"))
}
