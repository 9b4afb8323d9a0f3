use crate::store::AlertStore;
use chrono::{DateTime, Duration, Utc};
use costmon_common::id;
use costmon_common::types::{Alert, AlertType, MetricSample, MetricType, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const MAX_COOLDOWN_SECS: u64 = 365 * 24 * 3600;

/// Tuning for the built-in anomaly heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Samples a target needs before any heuristic runs.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Trailing samples per target considered at all.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Size of the "recent" tail compared against the rest of the window.
    #[serde(default = "default_recent_samples")]
    pub recent_samples: usize,
    #[serde(default = "default_spike_multiplier")]
    pub spike_multiplier: f64,
    /// Relative PUE rise that counts as an efficiency drop.
    #[serde(default = "default_efficiency_drop_threshold")]
    pub efficiency_drop_threshold: f64,
    #[serde(default = "default_utilization_low_threshold")]
    pub utilization_low_threshold: f64,
    /// Minimum gap between two alerts of the same type for the same
    /// target. Zero re-emits on every tick the condition holds and no alert
    /// is active.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_min_samples() -> usize {
    10
}

fn default_window_size() -> usize {
    30
}

fn default_recent_samples() -> usize {
    3
}

fn default_spike_multiplier() -> f64 {
    2.0
}

fn default_efficiency_drop_threshold() -> f64 {
    0.2
}

fn default_utilization_low_threshold() -> f64 {
    0.3
}

fn default_cooldown_secs() -> u64 {
    1800
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            min_samples: default_min_samples(),
            window_size: default_window_size(),
            recent_samples: default_recent_samples(),
            spike_multiplier: default_spike_multiplier(),
            efficiency_drop_threshold: default_efficiency_drop_threshold(),
            utilization_low_threshold: default_utilization_low_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Rule id carried by detector alerts of `alert_type`.
pub fn anomaly_rule_id(alert_type: AlertType) -> String {
    format!("anomaly:{alert_type}")
}

/// Statistical checks over each target's recent sample history.
///
/// Detector alerts skip breach counting and suppression. They are deduplicated
/// against the store (one active alert per target and type) and by a
/// per-type cooldown.
#[derive(Debug)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    last_emitted: HashMap<(String, AlertType), DateTime<Utc>>,
}

/// A heuristic hit before it becomes an alert.
struct Finding {
    alert_type: AlertType,
    metric: MetricType,
    severity: Severity,
    current: f64,
    threshold: f64,
    detail: String,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            last_emitted: HashMap::new(),
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    pub fn detect(
        &mut self,
        samples: &[MetricSample],
        store: &AlertStore,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();
        if !self.config.enabled {
            return alerts;
        }

        let mut by_target: BTreeMap<&str, Vec<&MetricSample>> = BTreeMap::new();
        for sample in samples {
            by_target
                .entry(sample.target_id.as_str())
                .or_default()
                .push(sample);
        }

        let cooldown = self.cooldown();
        for (target_id, mut series) in by_target {
            series.sort_by_key(|s| s.timestamp);
            let start = series.len().saturating_sub(self.config.window_size.max(1));
            let window = &series[start..];
            if window.len() < self.config.min_samples.max(1) {
                continue;
            }

            for finding in self.findings(window) {
                let rule_id = anomaly_rule_id(finding.alert_type);
                if store.active_for(&rule_id, target_id).is_some() {
                    tracing::debug!(target_id, alert_type = %finding.alert_type, "Anomaly already has an active alert");
                    continue;
                }
                let key = (target_id.to_string(), finding.alert_type);
                if self.config.cooldown_secs > 0
                    && self.last_emitted.get(&key).is_some_and(|last| now - *last < cooldown)
                {
                    tracing::debug!(target_id, alert_type = %finding.alert_type, "Anomaly in cooldown");
                    continue;
                }

                let latest = window[window.len() - 1];
                tracing::info!(
                    target_id,
                    alert_type = %finding.alert_type,
                    current = finding.current,
                    threshold = finding.threshold,
                    "Anomaly detected"
                );
                self.last_emitted.insert(key, now);
                alerts.push(Alert {
                    alert_id: id::next_alert_id(),
                    rule_id,
                    rule_name: detector_name(finding.alert_type).to_string(),
                    severity: finding.severity,
                    alert_type: finding.alert_type,
                    target_id: target_id.to_string(),
                    target_scope: latest.target_scope,
                    metric_type: finding.metric,
                    current_value: finding.current,
                    threshold_value: finding.threshold,
                    message: finding.detail,
                    triggered_at: now,
                    acknowledged_at: None,
                    acknowledged_by: None,
                    resolved_at: None,
                    resolution_note: None,
                    is_active: true,
                    suggested_actions: finding.alert_type.suggested_actions(),
                });
            }
        }

        alerts
    }

    /// Forgets cooldown entries older than the cooldown itself.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cooldown = self.cooldown();
        self.last_emitted.retain(|_, last| now - *last < cooldown);
    }

    fn cooldown(&self) -> Duration {
        Duration::seconds(self.config.cooldown_secs.min(MAX_COOLDOWN_SECS) as i64)
    }

    fn findings(&self, window: &[&MetricSample]) -> Vec<Finding> {
        let mut findings = Vec::new();
        let split = window.len().saturating_sub(self.config.recent_samples);
        if split == 0 || split == window.len() {
            return findings;
        }
        let (baseline, recent) = window.split_at(split);

        // Cost spike
        let baseline_costs: Vec<f64> = baseline.iter().map(|s| s.total_cost).collect();
        let recent_costs: Vec<f64> = recent.iter().map(|s| s.total_cost).collect();
        if let (Some(base_mean), Some(recent_mean)) = (mean(&baseline_costs), mean(&recent_costs)) {
            let spike_threshold = base_mean * self.config.spike_multiplier;
            if base_mean > 0.0 && recent_mean > spike_threshold {
                let z = match std_dev(&baseline_costs, base_mean) {
                    sd if sd > 0.0 => format!("z-score {:.2}", (recent_mean - base_mean) / sd),
                    _ => "flat baseline".to_string(),
                };
                let severity = if recent_mean > spike_threshold * 1.5 {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                findings.push(Finding {
                    alert_type: AlertType::CostSpike,
                    metric: MetricType::TotalCost,
                    severity,
                    current: recent_mean,
                    threshold: spike_threshold,
                    detail: format!(
                        "Cost spike: recent mean {recent_mean:.2} is {:.1}x the baseline mean {base_mean:.2} ({z})",
                        recent_mean / base_mean
                    ),
                });
            }
        }

        // Efficiency drop: PUE rising means more facility overhead per unit of IT load.
        let baseline_pue: Vec<f64> = baseline.iter().filter_map(|s| s.power_usage_effectiveness).collect();
        let recent_pue: Vec<f64> = recent.iter().filter_map(|s| s.power_usage_effectiveness).collect();
        if let (Some(base_pue), Some(recent_pue)) = (mean(&baseline_pue), mean(&recent_pue)) {
            if base_pue > 0.0 {
                let rise = (recent_pue - base_pue) / base_pue;
                if rise > self.config.efficiency_drop_threshold {
                    findings.push(Finding {
                        alert_type: AlertType::EfficiencyDrop,
                        metric: MetricType::PowerUsageEffectiveness,
                        severity: Severity::Warning,
                        current: recent_pue,
                        threshold: base_pue * (1.0 + self.config.efficiency_drop_threshold),
                        detail: format!(
                            "Efficiency drop: PUE rose {:.1}% from {base_pue:.2} to {recent_pue:.2}",
                            rise * 100.0
                        ),
                    });
                }
            }
        }

        let utilization: Vec<f64> = window.iter().filter_map(|s| s.utilization_rate).collect();
        if let Some(avg) = mean(&utilization) {
            if avg < self.config.utilization_low_threshold {
                findings.push(Finding {
                    alert_type: AlertType::UtilizationLow,
                    metric: MetricType::UtilizationRate,
                    severity: Severity::Info,
                    current: avg,
                    threshold: self.config.utilization_low_threshold,
                    detail: format!(
                        "Low utilization: moving average {:.1}% over {} samples is below {:.1}%",
                        avg * 100.0,
                        utilization.len(),
                        self.config.utilization_low_threshold * 100.0
                    ),
                });
            }
        }

        findings
    }
}

fn detector_name(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::CostSpike => "Cost spike detector",
        AlertType::EfficiencyDrop => "Efficiency drop detector",
        AlertType::UtilizationLow => "Low utilization detector",
        _ => "Anomaly detector",
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
