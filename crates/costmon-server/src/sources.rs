use crate::config::StaticSourceConfig;
use async_trait::async_trait;
use costmon_collector::{CostSourceAdapter, Result};
use costmon_common::types::{CostCategory, MetricSample, MonitoredTarget, TimeRange};
use std::sync::Arc;

/// Rate-based cost source: `hourly_cost` times the hours in the requested
/// range, reported under its category's cost field.
#[derive(Debug, Clone)]
pub struct StaticCostSource {
    config: StaticSourceConfig,
}

impl StaticCostSource {
    pub fn new(config: StaticSourceConfig) -> Self {
        Self { config }
    }

    fn serves(&self, target_id: &str) -> bool {
        self.config.targets.is_empty()
            || self
                .config
                .targets
                .iter()
                .any(|pattern| pattern == "*" || pattern == target_id || glob_match::glob_match(pattern, target_id))
    }
}

#[async_trait]
impl CostSourceAdapter for StaticCostSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn category(&self) -> CostCategory {
        self.config.category
    }

    async fn collect(&self, target: &MonitoredTarget, range: &TimeRange) -> Result<Vec<MetricSample>> {
        if !self.serves(&target.id) {
            return Ok(Vec::new());
        }

        let cost = self.config.hourly_cost * range.hours().max(0.0);
        let mut sample = MetricSample {
            total_cost: cost,
            utilization_rate: self.config.utilization_rate,
            power_usage_effectiveness: self.config.power_usage_effectiveness,
            cost_per_unit: self.config.cost_per_unit,
            quality_score: self.config.quality_score,
            budget_utilization: self.config.budget_utilization,
            ..MetricSample::empty(target.id.clone(), target.scope, range.end)
        };
        match self.config.category {
            CostCategory::Hardware => sample.hardware_cost = cost,
            CostCategory::PowerMaintenance => sample.power_cost = cost,
            CostCategory::Labor => sample.labor_cost = cost,
            CostCategory::Overhead => {}
        }
        Ok(vec![sample])
    }
}

/// Builds one adapter per configured static source.
pub fn build_static_sources(configs: &[StaticSourceConfig]) -> Vec<Arc<dyn CostSourceAdapter>> {
    configs
        .iter()
        .map(|config| {
            tracing::info!(
                name = %config.name,
                category = %config.category,
                hourly_cost = config.hourly_cost,
                "Static cost source registered"
            );
            Arc::new(StaticCostSource::new(config.clone())) as Arc<dyn CostSourceAdapter>
        })
        .collect()
}
