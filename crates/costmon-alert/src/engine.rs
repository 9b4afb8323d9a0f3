use crate::rule::{AlertRule, RuleDefinition};
use crate::store::AlertStore;
use crate::{AlertError, Result};
use chrono::{DateTime, Duration, Utc};
use costmon_common::id;
use costmon_common::types::{Alert, MetricSample};
use std::collections::BTreeMap;

/// What a rule produced on one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutput {
    /// A new alert for a breaching target. Not yet in the store.
    Fired(Alert),
    /// An active alert whose target stayed healthy for the rule's
    /// `recovery_ticks`.
    Recovered {
        alert_id: String,
        rule_id: String,
        target_id: String,
    },
}

#[derive(Debug, Default)]
pub struct EvaluationReport {
    pub outputs: Vec<AlertOutput>,
    /// One entry per rule whose evaluation failed this tick.
    pub errors: Vec<AlertError>,
    pub evaluated: usize,
    /// Disabled rules and rules with no relevant samples.
    pub skipped: usize,
}

impl EvaluationReport {
    pub fn fired(&self) -> impl Iterator<Item = &Alert> {
        self.outputs.iter().filter_map(|o| match o {
            AlertOutput::Fired(alert) => Some(alert),
            AlertOutput::Recovered { .. } => None,
        })
    }
}

/// Registry of threshold rules, each carrying its own breach counter and
/// suppression window.
#[derive(Debug, Default)]
pub struct AlertRuleEngine {
    rules: BTreeMap<String, AlertRule>,
}

impl AlertRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a rule, returning its id. The id comes from
    /// the definition when set, otherwise a fresh one is generated.
    pub fn create_rule(&mut self, definition: RuleDefinition) -> Result<String> {
        let rule_id = definition
            .rule_id
            .clone()
            .unwrap_or_else(id::next_rule_id);
        if self.rules.contains_key(&rule_id) {
            return Err(AlertError::DuplicateRule(rule_id));
        }
        let rule = definition.build(rule_id.clone())?;
        tracing::info!(
            rule_id = %rule.id,
            name = %rule.name,
            metric = %rule.metric,
            operator = %rule.operator,
            threshold = rule.threshold,
            "Alert rule registered"
        );
        self.rules.insert(rule_id.clone(), rule);
        Ok(rule_id)
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> Result<AlertRule> {
        let rule = self
            .rules
            .remove(rule_id)
            .ok_or_else(|| AlertError::RuleNotFound(rule_id.to_string()))?;
        tracing::info!(rule_id, "Alert rule removed");
        Ok(rule)
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<&AlertRule> {
        self.rules.get(rule_id)
    }

    /// Registered rules ordered by id.
    pub fn rules(&self) -> impl Iterator<Item = &AlertRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.rules.values().filter(|r| r.enabled).count()
    }

    /// Runs every enabled rule once against `samples`.
    ///
    /// `store` is consulted to avoid firing a second alert for a target
    /// that already has an active one, and to find alerts to recover. The
    /// caller inserts fired alerts and applies recoveries.
    pub fn evaluate(
        &mut self,
        samples: &[MetricSample],
        store: &AlertStore,
        now: DateTime<Utc>,
    ) -> EvaluationReport {
        let mut report = EvaluationReport::default();

        for rule in self.rules.values_mut() {
            if !rule.enabled {
                report.skipped += 1;
                continue;
            }
            match evaluate_rule(rule, samples, store, now) {
                Ok(Some(outputs)) => {
                    report.evaluated += 1;
                    report.outputs.extend(outputs);
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(rule_id = %rule.id, error = %e, "Rule evaluation failed");
                    report.errors.push(e);
                }
            }
        }

        report
    }
}

/// Advances one rule's state machine. `Ok(None)` means the rule had no
/// relevant samples newer than the ones it already evaluated, and its
/// counter was left untouched.
fn evaluate_rule(
    rule: &mut AlertRule,
    samples: &[MetricSample],
    store: &AlertStore,
    now: DateTime<Utc>,
) -> Result<Option<Vec<AlertOutput>>> {
    if rule.state.is_suppressed && rule.state.suppressed_until.is_some_and(|until| now > until) {
        rule.state.clear_suppression();
        tracing::debug!(rule_id = %rule.id, "Suppression window elapsed");
    }

    let window_start = now - rule.evaluation_window;
    let mut latest: BTreeMap<&str, (&MetricSample, f64)> = BTreeMap::new();
    for sample in samples {
        if sample.timestamp < window_start || sample.timestamp > now || !rule.applies_to(sample) {
            continue;
        }
        let Some(value) = rule.metric.value_of(sample) else {
            continue;
        };
        match latest.get(sample.target_id.as_str()) {
            Some((existing, _)) if existing.timestamp > sample.timestamp => {}
            _ => {
                latest.insert(sample.target_id.as_str(), (sample, value));
            }
        }
    }

    // A sample evaluated on an earlier tick is not a new observation.
    latest.retain(|target_id, (sample, _)| {
        rule.state
            .last_seen
            .get(*target_id)
            .map_or(true, |seen| sample.timestamp > *seen)
    });
    if latest.is_empty() {
        return Ok(None);
    }
    if let Some((target_id, (_, value))) = latest.iter().find(|(_, (_, v))| !v.is_finite()) {
        return Err(AlertError::Evaluation {
            rule_id: rule.id.clone(),
            reason: format!("non-finite {} value {value} for target '{target_id}'", rule.metric),
        });
    }
    for (target_id, (sample, _)) in &latest {
        rule.state
            .last_seen
            .insert(target_id.to_string(), sample.timestamp);
    }

    rule.state.last_evaluated_at = Some(now);
    let breaching: Vec<(&MetricSample, f64)> = latest
        .values()
        .filter(|(_, value)| rule.operator.check(*value, rule.threshold))
        .copied()
        .collect();

    let mut outputs = Vec::new();
    if breaching.is_empty() {
        if rule.state.consecutive_breaches > 0 {
            tracing::debug!(
                rule_id = %rule.id,
                breaches = rule.state.consecutive_breaches,
                "Breach streak broken"
            );
        }
        rule.state.consecutive_breaches = 0;
    } else {
        rule.state.consecutive_breaches += 1;
        if rule.state.consecutive_breaches >= rule.consecutive_breaches_required {
            if rule.state.is_suppressed {
                tracing::debug!(
                    rule_id = %rule.id,
                    suppressed_until = ?rule.state.suppressed_until,
                    "Alert suppressed (suppression window)"
                );
            } else {
                for (sample, value) in &breaching {
                    if store.active_for(&rule.id, &sample.target_id).is_some() {
                        tracing::debug!(
                            rule_id = %rule.id,
                            target_id = %sample.target_id,
                            "Target already has an active alert"
                        );
                        continue;
                    }
                    outputs.push(AlertOutput::Fired(build_alert(rule, sample, *value, now)));
                }
                if !outputs.is_empty() {
                    rule.state.last_triggered_at = Some(now);
                    rule.state.consecutive_breaches = 0;
                    if rule.suppression > Duration::zero() {
                        rule.state.suppress_until(now + rule.suppression);
                    }
                }
            }
        }
    }

    if rule.recovery_ticks > 0 {
        for (target_id, (_, value)) in &latest {
            let active = match store.active_for(&rule.id, target_id) {
                Some(alert) if !rule.operator.check(*value, rule.threshold) => alert,
                _ => {
                    rule.state.healthy_streaks.remove(*target_id);
                    continue;
                }
            };
            let streak = rule
                .state
                .healthy_streaks
                .entry(target_id.to_string())
                .or_insert(0);
            *streak += 1;
            if *streak >= rule.recovery_ticks {
                rule.state.healthy_streaks.remove(*target_id);
                outputs.push(AlertOutput::Recovered {
                    alert_id: active.alert_id.clone(),
                    rule_id: rule.id.clone(),
                    target_id: target_id.to_string(),
                });
            }
        }
    }

    Ok(Some(outputs))
}

fn build_alert(rule: &AlertRule, sample: &MetricSample, value: f64, now: DateTime<Utc>) -> Alert {
    Alert {
        alert_id: id::next_alert_id(),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        severity: rule.severity,
        alert_type: rule.alert_type,
        target_id: sample.target_id.clone(),
        target_scope: sample.target_scope,
        metric_type: rule.metric,
        current_value: value,
        threshold_value: rule.threshold,
        message: format!(
            "{} for {} is {:.2}, {} threshold {:.2} ({})",
            rule.metric,
            sample.target_id,
            value,
            rule.operator.describe(),
            rule.threshold,
            rule.name
        ),
        triggered_at: now,
        acknowledged_at: None,
        acknowledged_by: None,
        resolved_at: None,
        resolution_note: None,
        is_active: true,
        suggested_actions: rule.alert_type.suggested_actions(),
    }
}
