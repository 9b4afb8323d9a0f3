use anyhow::{Context, Result};
use costmon_alert::anomaly::AnomalyConfig;
use costmon_calc::CalculationConfig;
use costmon_common::types::{CostCategory, MonitoredTarget, TargetScope};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Per adapter call during collection.
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
    /// Adapter calls in flight at once during collection.
    #[serde(default = "default_collection_concurrency")]
    pub collection_concurrency: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_history_retention_secs")]
    pub history_retention_secs: u64,
    #[serde(default = "default_resolved_alert_retention_secs")]
    pub resolved_alert_retention_secs: u64,
    #[serde(default = "default_max_alert_history")]
    pub max_alert_history: usize,
    /// A tick slower than this many intervals logs a warning.
    #[serde(default = "default_tick_overrun_factor")]
    pub tick_overrun_factor: u32,
    /// Install the built-in rules when no rule is registered at startup.
    #[serde(default = "default_seed_default_rules")]
    pub seed_default_rules: bool,
    /// JSON rules seed file (`{"rules": [...]}`) loaded at startup.
    #[serde(default)]
    pub rules_file: Option<String>,

    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub calculation: CalculationConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub sources: Vec<StaticSourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Events buffered per subscriber before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: String,
    #[serde(default = "default_target_scope")]
    pub scope: TargetScope,
}

impl From<&TargetConfig> for MonitoredTarget {
    fn from(target: &TargetConfig) -> Self {
        MonitoredTarget::new(target.id.clone(), target.scope)
    }
}

/// A cost source that charges a fixed hourly rate, with optional fixed
/// efficiency readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticSourceConfig {
    pub name: String,
    pub category: CostCategory,
    pub hourly_cost: f64,
    /// Target ids or glob patterns this source reports for. Empty means all.
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub utilization_rate: Option<f64>,
    #[serde(default)]
    pub power_usage_effectiveness: Option<f64>,
    #[serde(default)]
    pub cost_per_unit: Option<f64>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub budget_utilization: Option<f64>,
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_adapter_timeout_secs() -> u64 {
    10
}

fn default_collection_concurrency() -> usize {
    8
}

fn default_history_capacity() -> usize {
    10_000
}

fn default_history_retention_secs() -> u64 {
    24 * 3600
}

fn default_resolved_alert_retention_secs() -> u64 {
    7 * 24 * 3600
}

fn default_max_alert_history() -> usize {
    5_000
}

fn default_tick_overrun_factor() -> u32 {
    3
}

fn default_seed_default_rules() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    256
}

fn default_target_scope() -> TargetScope {
    TargetScope::Asset
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            adapter_timeout_secs: default_adapter_timeout_secs(),
            collection_concurrency: default_collection_concurrency(),
            history_capacity: default_history_capacity(),
            history_retention_secs: default_history_retention_secs(),
            resolved_alert_retention_secs: default_resolved_alert_retention_secs(),
            max_alert_history: default_max_alert_history(),
            tick_overrun_factor: default_tick_overrun_factor(),
            seed_default_rules: default_seed_default_rules(),
            rules_file: None,
            anomaly: AnomalyConfig::default(),
            calculation: CalculationConfig::default(),
            notify: NotifyConfig::default(),
            targets: Vec::new(),
            sources: Vec::new(),
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config file '{path}'"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.tick_interval_secs > 0, "tick_interval_secs must be positive");
        anyhow::ensure!(self.adapter_timeout_secs > 0, "adapter_timeout_secs must be positive");
        anyhow::ensure!(self.history_capacity > 0, "history_capacity must be positive");
        anyhow::ensure!(self.tick_overrun_factor > 0, "tick_overrun_factor must be positive");
        anyhow::ensure!(
            self.calculation.timeout_secs > 0,
            "calculation.timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.anomaly.spike_multiplier > 0.0,
            "anomaly.spike_multiplier must be positive"
        );
        for source in &self.sources {
            anyhow::ensure!(
                source.hourly_cost.is_finite() && source.hourly_cost >= 0.0,
                "source '{}' has an invalid hourly_cost {}",
                source.name,
                source.hourly_cost
            );
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn monitored_targets(&self) -> Vec<MonitoredTarget> {
        self.targets.iter().map(MonitoredTarget::from).collect()
    }
}
