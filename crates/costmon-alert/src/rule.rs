use crate::{AlertError, Result};
use chrono::{DateTime, Duration, Utc};
use costmon_common::types::{AlertType, MetricSample, MetricType, Severity, TargetScope};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Absolute tolerance for `equal` / `not_equal`.
pub const EQUALITY_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    GreaterThan,
    LessThan,
    Equal,
    NotEqual,
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "greater_than" | "gt" | ">" => Ok(Self::GreaterThan),
            "less_than" | "lt" | "<" => Ok(Self::LessThan),
            "equal" | "eq" | "==" => Ok(Self::Equal),
            "not_equal" | "ne" | "!=" => Ok(Self::NotEqual),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreaterThan => write!(f, "greater_than"),
            Self::LessThan => write!(f, "less_than"),
            Self::Equal => write!(f, "equal"),
            Self::NotEqual => write!(f, "not_equal"),
        }
    }
}

impl CompareOp {
    /// Whether `value` breaches `threshold` under this operator.
    ///
    /// # Examples
    ///
    /// ```
    /// use costmon_alert::rule::CompareOp;
    ///
    /// assert!(!CompareOp::GreaterThan.check(100.0, 100.0));
    /// assert!(CompareOp::GreaterThan.check(100.01, 100.0));
    /// assert!(CompareOp::Equal.check(100.005, 100.0));
    /// assert!(!CompareOp::Equal.check(100.02, 100.0));
    /// ```
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::Equal => (value - threshold).abs() < EQUALITY_EPSILON,
            Self::NotEqual => (value - threshold).abs() >= EQUALITY_EPSILON,
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::GreaterThan => "above",
            Self::LessThan => "below",
            Self::Equal => "equal to",
            Self::NotEqual => "different from",
        }
    }
}

/// Registration payload for an alert rule, as it arrives from the API or a
/// rules seed file. Validated into an [`AlertRule`] by [`RuleDefinition::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    #[serde(default)]
    pub rule_id: Option<String>,
    pub name: String,
    #[serde(default = "default_alert_type")]
    pub alert_type: AlertType,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    /// Restricts the rule to targets of one scope.
    #[serde(default)]
    pub scope: Option<TargetScope>,
    /// Exact target ids or glob patterns (`gpu-*`). Empty means every target.
    #[serde(default)]
    pub target_ids: Vec<String>,
    pub metric_type: String,
    #[serde(default)]
    pub threshold_value: Option<f64>,
    pub comparison_operator: String,
    #[serde(default = "default_evaluation_window_secs")]
    pub evaluation_window_secs: i64,
    #[serde(default = "default_consecutive_breaches")]
    pub consecutive_breaches_required: u32,
    #[serde(default)]
    pub suppression_secs: u64,
    /// Consecutive healthy ticks after which an active alert auto-resolves.
    /// Zero disables auto-recovery.
    #[serde(default)]
    pub recovery_ticks: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_alert_type() -> AlertType {
    AlertType::CostThreshold
}

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_evaluation_window_secs() -> i64 {
    900
}

fn default_consecutive_breaches() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl RuleDefinition {
    /// A threshold rule with default window (15 min), one required breach
    /// and no suppression.
    pub fn threshold(name: &str, metric_type: &str, operator: &str, threshold_value: f64) -> Self {
        Self {
            rule_id: None,
            name: name.to_string(),
            alert_type: default_alert_type(),
            severity: default_severity(),
            scope: None,
            target_ids: Vec::new(),
            metric_type: metric_type.to_string(),
            threshold_value: Some(threshold_value),
            comparison_operator: operator.to_string(),
            evaluation_window_secs: default_evaluation_window_secs(),
            consecutive_breaches_required: default_consecutive_breaches(),
            suppression_secs: 0,
            recovery_ticks: 0,
            enabled: true,
        }
    }

    /// Validates the definition and turns it into a rule with fresh
    /// evaluation state.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::InvalidRuleConfig`] on a missing or
    /// non-finite threshold, a non-positive window, zero required breaches,
    /// or an unknown comparator or metric.
    pub fn build(self, rule_id: String) -> Result<AlertRule> {
        let invalid = |reason: String| AlertError::InvalidRuleConfig {
            rule: if self.name.is_empty() {
                rule_id.clone()
            } else {
                self.name.clone()
            },
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        let threshold = self
            .threshold_value
            .ok_or_else(|| invalid("threshold_value is required".to_string()))?;
        if !threshold.is_finite() {
            return Err(invalid(format!("threshold_value must be finite, got {threshold}")));
        }
        if self.evaluation_window_secs <= 0 {
            return Err(invalid(format!(
                "evaluation_window_secs must be positive, got {}",
                self.evaluation_window_secs
            )));
        }
        if self.consecutive_breaches_required == 0 {
            return Err(invalid("consecutive_breaches_required must be at least 1".to_string()));
        }
        let operator: CompareOp = self.comparison_operator.parse().map_err(invalid)?;
        let metric: MetricType = self.metric_type.parse().map_err(invalid)?;
        let suppression_secs = i64::try_from(self.suppression_secs)
            .map_err(|_| invalid(format!("suppression_secs out of range: {}", self.suppression_secs)))?;

        Ok(AlertRule {
            id: rule_id,
            name: self.name,
            alert_type: self.alert_type,
            severity: self.severity,
            scope: self.scope,
            target_ids: self.target_ids,
            metric,
            threshold,
            operator,
            evaluation_window: Duration::seconds(self.evaluation_window_secs),
            consecutive_breaches_required: self.consecutive_breaches_required,
            suppression: Duration::seconds(suppression_secs),
            recovery_ticks: self.recovery_ticks,
            enabled: self.enabled,
            state: RuleState::default(),
        })
    }
}

/// Where a rule currently sits in its evaluation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Idle,
    Breaching,
    Suppressed,
}

/// Evaluation state owned by the engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleState {
    pub consecutive_breaches: u32,
    pub is_suppressed: bool,
    pub suppressed_until: Option<DateTime<Utc>>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Healthy-tick streak per target with an active alert.
    #[serde(skip)]
    pub(crate) healthy_streaks: HashMap<String, u32>,
    /// Timestamp of the newest sample already evaluated, per target.
    #[serde(skip)]
    pub(crate) last_seen: HashMap<String, DateTime<Utc>>,
}

impl RuleState {
    pub fn status(&self) -> RuleStatus {
        if self.is_suppressed {
            RuleStatus::Suppressed
        } else if self.consecutive_breaches > 0 {
            RuleStatus::Breaching
        } else {
            RuleStatus::Idle
        }
    }

    pub(crate) fn suppress_until(&mut self, until: DateTime<Utc>) {
        self.is_suppressed = true;
        self.suppressed_until = Some(until);
    }

    pub(crate) fn clear_suppression(&mut self) {
        self.is_suppressed = false;
        self.suppressed_until = None;
    }
}

/// A registered threshold rule plus its evaluation state.
///
/// Configuration fields are read-only once registered; the state is only
/// advanced by [`crate::engine::AlertRuleEngine`].
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub scope: Option<TargetScope>,
    pub target_ids: Vec<String>,
    pub metric: MetricType,
    pub threshold: f64,
    pub operator: CompareOp,
    pub evaluation_window: Duration,
    pub consecutive_breaches_required: u32,
    pub suppression: Duration,
    pub recovery_ticks: u32,
    pub enabled: bool,
    pub(crate) state: RuleState,
}

impl AlertRule {
    pub fn state(&self) -> &RuleState {
        &self.state
    }

    /// Whether `sample` belongs to a target this rule watches.
    pub fn applies_to(&self, sample: &MetricSample) -> bool {
        if self.scope.is_some_and(|scope| scope != sample.target_scope) {
            return false;
        }
        self.target_ids.is_empty()
            || self
                .target_ids
                .iter()
                .any(|pattern| target_matches(pattern, &sample.target_id))
    }

    /// The definition this rule was built from, with its assigned id.
    pub fn to_definition(&self) -> RuleDefinition {
        RuleDefinition {
            rule_id: Some(self.id.clone()),
            name: self.name.clone(),
            alert_type: self.alert_type,
            severity: self.severity,
            scope: self.scope,
            target_ids: self.target_ids.clone(),
            metric_type: self.metric.to_string(),
            threshold_value: Some(self.threshold),
            comparison_operator: self.operator.to_string(),
            evaluation_window_secs: self.evaluation_window.num_seconds(),
            consecutive_breaches_required: self.consecutive_breaches_required,
            suppression_secs: self.suppression.num_seconds().max(0) as u64,
            recovery_ticks: self.recovery_ticks,
            enabled: self.enabled,
        }
    }
}

fn target_matches(pattern: &str, target_id: &str) -> bool {
    if pattern == "*" || pattern == target_id {
        return true;
    }
    glob_match::glob_match(pattern, target_id)
}
