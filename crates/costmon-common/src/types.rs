use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use costmon_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert_eq!(sev.to_string(), "warning");
/// assert!(Severity::Critical > Severity::Info);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" | "low" => Ok(Severity::Info),
            "warning" | "medium" => Ok(Severity::Warning),
            "critical" | "high" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Granularity a target, metric or alert applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetScope {
    Asset,
    CostCenter,
    Project,
    Department,
    Organization,
}

impl std::fmt::Display for TargetScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetScope::Asset => "asset",
            TargetScope::CostCenter => "cost_center",
            TargetScope::Project => "project",
            TargetScope::Department => "department",
            TargetScope::Organization => "organization",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TargetScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset" => Ok(TargetScope::Asset),
            "cost_center" => Ok(TargetScope::CostCenter),
            "project" => Ok(TargetScope::Project),
            "department" => Ok(TargetScope::Department),
            "organization" | "org" => Ok(TargetScope::Organization),
            _ => Err(format!("unknown target scope: {s}")),
        }
    }
}

/// A target the scheduler collects cost samples for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub id: String,
    pub scope: TargetScope,
}

impl MonitoredTarget {
    pub fn new(id: impl Into<String>, scope: TargetScope) -> Self {
        Self {
            id: id.into(),
            scope,
        }
    }
}

/// Half-open time range `[start, end)` handed to cost sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The range of length `span` ending at `end`.
    pub fn trailing(span: Duration, end: DateTime<Utc>) -> Self {
        Self {
            start: end - span,
            end,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn hours(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 3_600_000.0
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Cost category a source adapter computes. Each category is one
/// sub-calculation of an aggregate calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Hardware,
    PowerMaintenance,
    Labor,
    Overhead,
}

impl CostCategory {
    pub const ALL: [CostCategory; 4] = [
        CostCategory::Hardware,
        CostCategory::PowerMaintenance,
        CostCategory::Labor,
        CostCategory::Overhead,
    ];
}

impl std::fmt::Display for CostCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CostCategory::Hardware => "hardware",
            CostCategory::PowerMaintenance => "power_maintenance",
            CostCategory::Labor => "labor",
            CostCategory::Overhead => "overhead",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for CostCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hardware" => Ok(CostCategory::Hardware),
            "power_maintenance" | "power" | "maintenance" => Ok(CostCategory::PowerMaintenance),
            "labor" => Ok(CostCategory::Labor),
            "overhead" => Ok(CostCategory::Overhead),
            _ => Err(format!("unknown cost category: {s}")),
        }
    }
}

/// Point-in-time cost and efficiency snapshot for one target.
///
/// Cost fields are always present (zero when a source has nothing to
/// report); rate fields are `None` when no source reported them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub target_id: String,
    pub target_scope: TargetScope,
    pub total_cost: f64,
    #[serde(default)]
    pub hardware_cost: f64,
    #[serde(default)]
    pub power_cost: f64,
    #[serde(default)]
    pub maintenance_cost: f64,
    #[serde(default)]
    pub labor_cost: f64,
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

impl MetricSample {
    /// A sample with every cost at zero and no rates, meant to be filled
    /// with struct update syntax.
    pub fn empty(
        target_id: impl Into<String>,
        target_scope: TargetScope,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            target_id: target_id.into(),
            target_scope,
            total_cost: 0.0,
            hardware_cost: 0.0,
            power_cost: 0.0,
            maintenance_cost: 0.0,
            labor_cost: 0.0,
            utilization_rate: None,
            power_usage_effectiveness: None,
            cost_per_unit: None,
            quality_score: None,
            budget_utilization: None,
        }
    }
}

/// The sample field an alert rule or detector looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    TotalCost,
    HardwareCost,
    PowerCost,
    MaintenanceCost,
    LaborCost,
    UtilizationRate,
    PowerUsageEffectiveness,
    CostPerUnit,
    QualityScore,
    BudgetUtilization,
}

impl MetricType {
    /// Reads this metric off a sample. `None` when the sample carries no
    /// value for it.
    pub fn value_of(&self, sample: &MetricSample) -> Option<f64> {
        match self {
            MetricType::TotalCost => Some(sample.total_cost),
            MetricType::HardwareCost => Some(sample.hardware_cost),
            MetricType::PowerCost => Some(sample.power_cost),
            MetricType::MaintenanceCost => Some(sample.maintenance_cost),
            MetricType::LaborCost => Some(sample.labor_cost),
            MetricType::UtilizationRate => sample.utilization_rate,
            MetricType::PowerUsageEffectiveness => sample.power_usage_effectiveness,
            MetricType::CostPerUnit => sample.cost_per_unit,
            MetricType::QualityScore => sample.quality_score,
            MetricType::BudgetUtilization => sample.budget_utilization,
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricType::TotalCost => "total_cost",
            MetricType::HardwareCost => "hardware_cost",
            MetricType::PowerCost => "power_cost",
            MetricType::MaintenanceCost => "maintenance_cost",
            MetricType::LaborCost => "labor_cost",
            MetricType::UtilizationRate => "utilization_rate",
            MetricType::PowerUsageEffectiveness => "power_usage_effectiveness",
            MetricType::CostPerUnit => "cost_per_unit",
            MetricType::QualityScore => "quality_score",
            MetricType::BudgetUtilization => "budget_utilization",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total_cost" | "cost" => Ok(MetricType::TotalCost),
            "hardware_cost" => Ok(MetricType::HardwareCost),
            "power_cost" => Ok(MetricType::PowerCost),
            "maintenance_cost" => Ok(MetricType::MaintenanceCost),
            "labor_cost" => Ok(MetricType::LaborCost),
            "utilization_rate" | "utilization" => Ok(MetricType::UtilizationRate),
            "power_usage_effectiveness" | "pue" => Ok(MetricType::PowerUsageEffectiveness),
            "cost_per_unit" => Ok(MetricType::CostPerUnit),
            "quality_score" => Ok(MetricType::QualityScore),
            "budget_utilization" => Ok(MetricType::BudgetUtilization),
            _ => Err(format!("unknown metric type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    CostThreshold,
    BudgetOverrun,
    CostSpike,
    EfficiencyDrop,
    UtilizationLow,
    QualityDegradation,
}

impl AlertType {
    /// Canned remediation hints attached to every alert of this type.
    pub fn suggested_actions(&self) -> Vec<String> {
        let actions: &[&str] = match self {
            AlertType::CostThreshold => &[
                "Review the cost breakdown of the affected target",
                "Check for unplanned resource usage",
            ],
            AlertType::BudgetOverrun => &[
                "Notify the budget owner",
                "Freeze non-essential spend for the cost center",
                "Re-forecast the remaining budget period",
            ],
            AlertType::CostSpike => &[
                "Inspect recent workload changes on the target",
                "Compare against the previous period with a cost comparison",
                "Verify source data for double-counted entries",
            ],
            AlertType::EfficiencyDrop => &[
                "Check cooling and facility power draw",
                "Consolidate under-used hardware to improve PUE",
            ],
            AlertType::UtilizationLow => &[
                "Consider downsizing or reassigning idle hardware",
                "Schedule batch workloads onto the idle capacity",
            ],
            AlertType::QualityDegradation => &[
                "Review recent model or strategy changes",
                "Check the data feeds behind the quality score",
            ],
        };
        actions.iter().map(|s| s.to_string()).collect()
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertType::CostThreshold => "cost_threshold",
            AlertType::BudgetOverrun => "budget_overrun",
            AlertType::CostSpike => "cost_spike",
            AlertType::EfficiencyDrop => "efficiency_drop",
            AlertType::UtilizationLow => "utilization_low",
            AlertType::QualityDegradation => "quality_degradation",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cost_threshold" => Ok(AlertType::CostThreshold),
            "budget_overrun" => Ok(AlertType::BudgetOverrun),
            "cost_spike" => Ok(AlertType::CostSpike),
            "efficiency_drop" => Ok(AlertType::EfficiencyDrop),
            "utilization_low" => Ok(AlertType::UtilizationLow),
            "quality_degradation" => Ok(AlertType::QualityDegradation),
            _ => Err(format!("unknown alert type: {s}")),
        }
    }
}

/// A triggered alert. Only the acknowledge and resolve fields change after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    /// Owning rule, or `anomaly:<alert_type>` for detector alerts.
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub alert_type: AlertType,
    pub target_id: String,
    pub target_scope: TargetScope,
    pub metric_type: MetricType,
    pub current_value: f64,
    pub threshold_value: f64,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
    pub is_active: bool,
    pub suggested_actions: Vec<String>,
}

impl Alert {
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    pub fn mark_acknowledged(&mut self, by: &str, now: DateTime<Utc>) {
        self.acknowledged_at = Some(now);
        self.acknowledged_by = Some(by.to_string());
    }

    pub fn mark_resolved(&mut self, note: &str, now: DateTime<Utc>) {
        self.is_active = false;
        self.resolved_at = Some(now);
        self.resolution_note = Some(note.to_string());
    }
}

/// Per-tick digest broadcast to subscribers as an `update` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub tick: u64,
    pub generated_at: Option<DateTime<Utc>>,
    pub targets_monitored: usize,
    pub samples_collected: usize,
    pub adapter_failures: usize,
    /// Sum of the latest total cost of every target.
    pub total_cost: f64,
    pub active_rules: usize,
    pub active_alerts: usize,
    pub active_alerts_by_severity: BTreeMap<Severity, usize>,
    pub alerts_triggered: usize,
    pub alerts_resolved: usize,
    pub tick_duration_ms: u64,
}

/// Event delivered to subscribers, serialized as `{"type": ..., "payload": ...}`.
///
/// # Examples
///
/// ```
/// use costmon_common::types::{MonitoringEvent, MonitoringSummary};
///
/// let event = MonitoringEvent::Update(MonitoringSummary::default());
/// let json = serde_json::to_value(&event).unwrap();
/// assert_eq!(json["type"], "update");
/// assert!(json["payload"].is_object());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MonitoringEvent {
    Initial {
        active_alerts: Vec<Alert>,
        summary: MonitoringSummary,
    },
    Update(MonitoringSummary),
    AlertTriggered(Alert),
    AlertAcknowledged(Alert),
    AlertResolved(Alert),
}

impl MonitoringEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MonitoringEvent::Initial { .. } => "initial",
            MonitoringEvent::Update(_) => "update",
            MonitoringEvent::AlertTriggered(_) => "alert_triggered",
            MonitoringEvent::AlertAcknowledged(_) => "alert_acknowledged",
            MonitoringEvent::AlertResolved(_) => "alert_resolved",
        }
    }

    /// The alert carried by alert lifecycle events.
    pub fn alert(&self) -> Option<&Alert> {
        match self {
            MonitoringEvent::AlertTriggered(a)
            | MonitoringEvent::AlertAcknowledged(a)
            | MonitoringEvent::AlertResolved(a) => Some(a),
            MonitoringEvent::Initial { .. } | MonitoringEvent::Update(_) => None,
        }
    }
}
