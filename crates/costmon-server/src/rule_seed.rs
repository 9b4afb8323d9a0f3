use crate::config::MonitorConfig;
use crate::monitor::CostMonitor;
use anyhow::{Context, Result};
use costmon_alert::rule::RuleDefinition;
use costmon_common::types::{AlertType, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Built-in rule installed on first startup.
struct DefaultRule {
    name: &'static str,
    alert_type: AlertType,
    metric: &'static str,
    operator: &'static str,
    threshold: f64,
    severity: Severity,
    consecutive_breaches: u32,
    suppression_secs: u64,
}

const DEFAULT_RULES: &[DefaultRule] = &[
    // ---- Budget ----
    DefaultRule {
        name: "Budget exceeded",
        alert_type: AlertType::BudgetOverrun,
        metric: "budget_utilization",
        operator: "greater_than",
        threshold: 1.0,
        severity: Severity::Critical,
        consecutive_breaches: 1,
        suppression_secs: 3600,
    },
    DefaultRule {
        name: "Budget nearly exhausted",
        alert_type: AlertType::BudgetOverrun,
        metric: "budget_utilization",
        operator: "greater_than",
        threshold: 0.9,
        severity: Severity::Warning,
        consecutive_breaches: 2,
        suppression_secs: 3600,
    },
    // ---- Utilization ----
    DefaultRule {
        name: "Low utilization",
        alert_type: AlertType::UtilizationLow,
        metric: "utilization_rate",
        operator: "less_than",
        threshold: 0.2,
        severity: Severity::Info,
        consecutive_breaches: 3,
        suppression_secs: 6 * 3600,
    },
    // ---- Efficiency ----
    DefaultRule {
        name: "High PUE",
        alert_type: AlertType::EfficiencyDrop,
        metric: "power_usage_effectiveness",
        operator: "greater_than",
        threshold: 1.8,
        severity: Severity::Warning,
        consecutive_breaches: 3,
        suppression_secs: 3600,
    },
    // ---- Quality ----
    DefaultRule {
        name: "Quality degradation",
        alert_type: AlertType::QualityDegradation,
        metric: "quality_score",
        operator: "less_than",
        threshold: 0.7,
        severity: Severity::Warning,
        consecutive_breaches: 2,
        suppression_secs: 1800,
    },
];

impl DefaultRule {
    fn to_definition(&self) -> RuleDefinition {
        RuleDefinition {
            alert_type: self.alert_type,
            severity: self.severity,
            consecutive_breaches_required: self.consecutive_breaches,
            suppression_secs: self.suppression_secs,
            ..RuleDefinition::threshold(self.name, self.metric, self.operator, self.threshold)
        }
    }
}

/// Installs the built-in rules when the monitor has none. Returns how many
/// rules were created.
pub fn init_default_rules(monitor: &CostMonitor) -> usize {
    if monitor.rule_count() > 0 {
        tracing::debug!("Alert rules already present, skipping default seed");
        return 0;
    }

    let mut created = 0;
    for rule in DEFAULT_RULES {
        match monitor.create_rule(rule.to_definition()) {
            Ok(_) => created += 1,
            Err(e) => tracing::error!(name = rule.name, error = %e, "Failed to create default rule"),
        }
    }
    tracing::info!(count = created, "Default alert rules initialized");
    created
}

/// JSON rules seed file: `{"rules": [ ... ]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesSeedFile {
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn load_rules_file(path: &str) -> Result<RulesSeedFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file '{path}'"))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse rules file '{path}'"))
}

impl RulesSeedFile {
    /// Checks every rule without registering anything. Returns one message
    /// per invalid rule.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut names = HashSet::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if !names.insert(rule.name.as_str()) {
                problems.push(format!("rule #{i}: duplicate name '{}'", rule.name));
            }
            if let Err(e) = rule.clone().build(format!("seed-{i}")) {
                problems.push(format!("rule #{i}: {e}"));
            }
        }
        problems
    }

    /// Registers the rules, skipping any whose name is already taken.
    pub fn apply(&self, monitor: &CostMonitor) -> SeedReport {
        let mut existing: HashSet<String> = monitor.list_rules().into_iter().map(|r| r.name).collect();
        let mut report = SeedReport::default();

        for rule in &self.rules {
            if existing.contains(&rule.name) {
                tracing::warn!(name = %rule.name, "Rule already exists, skipping");
                report.skipped += 1;
                continue;
            }
            match monitor.create_rule(rule.clone()) {
                Ok(rule_id) => {
                    existing.insert(rule.name.clone());
                    tracing::info!(name = %rule.name, %rule_id, "Rule created");
                    report.created += 1;
                }
                Err(e) => {
                    tracing::error!(name = %rule.name, error = %e, "Failed to create rule");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Startup seeding: the configured rules file first, then the built-in
/// rules if the registry is still empty.
pub fn seed_rules(config: &MonitorConfig, monitor: &CostMonitor) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    if let Some(path) = config.rules_file.as_deref() {
        let seed = load_rules_file(path)?;
        report = seed.apply(monitor);
        tracing::info!(
            path,
            created = report.created,
            skipped = report.skipped,
            failed = report.failed,
            "Rules file applied"
        );
    }
    if config.seed_default_rules {
        report.created += init_default_rules(monitor);
    }
    Ok(report)
}
