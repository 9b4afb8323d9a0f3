use crate::anomaly::{anomaly_rule_id, AnomalyConfig, AnomalyDetector};
use crate::engine::{AlertOutput, AlertRuleEngine};
use crate::rule::{CompareOp, RuleDefinition, RuleStatus};
use crate::store::AlertStore;
use crate::AlertError;
use chrono::{DateTime, Duration, Utc};
use costmon_common::types::{Alert, AlertType, MetricSample, MetricType, Severity, TargetScope};

fn cost_sample(target: &str, cost: f64, at: DateTime<Utc>) -> MetricSample {
    MetricSample {
        total_cost: cost,
        ..MetricSample::empty(target, TargetScope::Asset, at)
    }
}

/// Evaluates one tick and applies the outputs to the store the way the
/// monitor does. Returns the alerts fired on this tick.
fn tick(
    engine: &mut AlertRuleEngine,
    store: &mut AlertStore,
    samples: &[MetricSample],
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let report = engine.evaluate(samples, store, now);
    let mut fired = Vec::new();
    for output in report.outputs {
        match output {
            AlertOutput::Fired(alert) => {
                store.insert(alert.clone()).expect("no duplicate active alert");
                fired.push(alert);
            }
            AlertOutput::Recovered { alert_id, .. } => {
                store.resolve(&alert_id, "recovered", now).expect("resolve");
            }
        }
    }
    fired
}

fn gpu_rule(required: u32) -> RuleDefinition {
    RuleDefinition {
        consecutive_breaches_required: required,
        ..RuleDefinition::threshold("GPU cost", "cost", "greater_than", 1000.0)
    }
}

#[test]
fn gpu_cost_rule_fires_on_second_consecutive_breach() {
    let mut engine = AlertRuleEngine::new();
    let mut store = AlertStore::new();
    engine.create_rule(gpu_rule(2)).expect("valid rule");

    let t1 = Utc::now();
    let mut history = vec![cost_sample("gpu-01", 1200.0, t1)];
    assert!(tick(&mut engine, &mut store, &history, t1).is_empty());

    let t2 = t1 + Duration::seconds(60);
    history.push(cost_sample("gpu-01", 1300.0, t2));
    let fired = tick(&mut engine, &mut store, &history, t2);

    assert_eq!(fired.len(), 1);
    let alert = &fired[0];
    assert_eq!(alert.target_id, "gpu-01");
    assert_eq!(alert.current_value, 1300.0);
    assert_eq!(alert.threshold_value, 1000.0);
    assert_eq!(alert.metric_type, MetricType::TotalCost);
    assert_eq!(alert.alert_type, AlertType::CostThreshold);
    assert!(alert.is_active);
    assert!(!alert.suggested_actions.is_empty());
    assert!(alert.alert_id.starts_with("alert-"));
}

#[test]
fn sample_seen_on_an_earlier_tick_is_not_a_new_breach() {
    let mut engine = AlertRuleEngine::new();
    let mut store = AlertStore::new();
    let rule_id = engine.create_rule(gpu_rule(2)).expect("valid rule");

    let t0 = Utc::now();
    let history = vec![cost_sample("gpu-01", 1200.0, t0)];
    assert!(tick(&mut engine, &mut store, &history, t0).is_empty());

    // Collection failed this tick; only the old sample is still in the window.
    let t1 = t0 + Duration::seconds(60);
    let report = engine.evaluate(&history, &store, t1);
    assert_eq!(report.skipped, 1);
    assert!(report.outputs.is_empty());
    assert_eq!(
        engine.get_rule(&rule_id).expect("rule").state().consecutive_breaches,
        1
    );

    let t2 = t0 + Duration::seconds(120);
    let mut history = history;
    history.push(cost_sample("gpu-01", 1250.0, t2));
    let fired = tick(&mut engine, &mut store, &history, t2);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].current_value, 1250.0);
}

#[test]
fn interrupted_breach_streak_resets_counter() {
    let mut engine = AlertRuleEngine::new();
    let mut store = AlertStore::new();
    let rule_id = engine.create_rule(gpu_rule(3)).expect("valid rule");

    let start = Utc::now();
    let values = [1500.0, 1500.0, 900.0, 1500.0, 1500.0];
    for (i, value) in values.iter().enumerate() {
        let now = start + Duration::seconds(60 * i as i64);
        let fired = tick(&mut engine, &mut store, &[cost_sample("gpu-01", *value, now)], now);
        assert!(fired.is_empty(), "no alert expected at tick {i}");
        if *value < 1000.0 {
            let state = engine.get_rule(&rule_id).expect("rule").state();
            assert_eq!(state.consecutive_breaches, 0);
            assert_eq!(state.status(), RuleStatus::Idle);
        }
    }

    let now = start + Duration::seconds(60 * values.len() as i64);
    let fired = tick(&mut engine, &mut store, &[cost_sample("gpu-01", 1500.0, now)], now);
    assert_eq!(fired.len(), 1);
}

#[test]
fn suppression_blocks_alerts_until_window_elapses() {
    let mut engine = AlertRuleEngine::new();
    let mut store = AlertStore::new();
    let rule_id = engine
        .create_rule(RuleDefinition {
            suppression_secs: 600,
            ..gpu_rule(1)
        })
        .expect("valid rule");

    let start = Utc::now();
    let fired = tick(&mut engine, &mut store, &[cost_sample("gpu-01", 2000.0, start)], start);
    assert_eq!(fired.len(), 1);
    assert_eq!(
        engine.get_rule(&rule_id).expect("rule").state().status(),
        RuleStatus::Suppressed
    );

    // Resolve so that only suppression can hold the rule back.
    store
        .resolve(&fired[0].alert_id, "handled", start)
        .expect("resolve");

    for minute in 1..=10 {
        let now = start + Duration::seconds(60 * minute);
        let fired = tick(&mut engine, &mut store, &[cost_sample("gpu-01", 2000.0, now)], now);
        assert!(fired.is_empty(), "suppressed at minute {minute}");
    }

    let now = start + Duration::seconds(660);
    let fired = tick(&mut engine, &mut store, &[cost_sample("gpu-01", 2000.0, now)], now);
    assert_eq!(fired.len(), 1);
}

#[test]
fn comparator_boundaries() {
    assert!(!CompareOp::GreaterThan.check(100.0, 100.0));
    assert!(CompareOp::GreaterThan.check(100.01, 100.0));
    assert!(!CompareOp::LessThan.check(100.0, 100.0));
    assert!(CompareOp::Equal.check(100.005, 100.0));
    assert!(!CompareOp::Equal.check(100.02, 100.0));
    assert!(!CompareOp::NotEqual.check(100.005, 100.0));
    assert!(CompareOp::NotEqual.check(100.02, 100.0));
}

#[test]
fn equal_rule_fires_within_epsilon() {
    let mut engine = AlertRuleEngine::new();
    let mut store = AlertStore::new();
    engine
        .create_rule(RuleDefinition::threshold("flat", "cost", "equal", 100.0))
        .expect("valid rule");

    let now = Utc::now();
    let fired = tick(&mut engine, &mut store, &[cost_sample("gpu-01", 100.005, now)], now);
    assert_eq!(fired.len(), 1);
}

#[test]
fn rule_without_relevant_samples_is_skipped() {
    let mut engine = AlertRuleEngine::new();
    let store = AlertStore::new();
    let rule_id = engine.create_rule(gpu_rule(2)).expect("valid rule");

    let now = Utc::now();
    let report = engine.evaluate(&[cost_sample("gpu-01", 1500.0, now)], &store, now);
    assert_eq!(report.evaluated, 1);

    // Older than the 15 minute window.
    let later = now + Duration::minutes(30);
    let report = engine.evaluate(&[cost_sample("gpu-01", 1500.0, now)], &store, later);
    assert_eq!(report.skipped, 1);
    assert!(report.outputs.is_empty());
    assert_eq!(
        engine.get_rule(&rule_id).expect("rule").state().consecutive_breaches,
        1
    );
}

#[test]
fn invalid_rule_configs_are_rejected() {
    let mut engine = AlertRuleEngine::new();

    let cases = [
        RuleDefinition {
            threshold_value: None,
            ..gpu_rule(1)
        },
        RuleDefinition {
            threshold_value: Some(f64::NAN),
            ..gpu_rule(1)
        },
        RuleDefinition {
            evaluation_window_secs: 0,
            ..gpu_rule(1)
        },
        gpu_rule(0),
        RuleDefinition::threshold("GPU cost", "cost", "roughly", 1000.0),
        RuleDefinition::threshold("GPU cost", "watts", "greater_than", 1000.0),
        RuleDefinition::threshold("  ", "cost", "greater_than", 1000.0),
    ];

    for definition in cases {
        let err = engine.create_rule(definition.clone()).unwrap_err();
        assert!(
            matches!(err, AlertError::InvalidRuleConfig { .. }),
            "{definition:?} should be rejected, got {err}"
        );
    }
    assert!(engine.is_empty());
}

#[test]
fn duplicate_rule_id_is_rejected() {
    let mut engine = AlertRuleEngine::new();
    let definition = RuleDefinition {
        rule_id: Some("gpu-cost".into()),
        ..gpu_rule(1)
    };
    assert_eq!(engine.create_rule(definition.clone()), Ok("gpu-cost".to_string()));
    assert_eq!(
        engine.create_rule(definition),
        Err(AlertError::DuplicateRule("gpu-cost".into()))
    );
    assert!(engine.remove_rule("gpu-cost").is_ok());
    assert!(matches!(
        engine.remove_rule("gpu-cost"),
        Err(AlertError::RuleNotFound(_))
    ));
}

#[test]
fn failing_rule_does_not_stop_other_rules() {
    let mut engine = AlertRuleEngine::new();
    let store = AlertStore::new();
    engine
        .create_rule(RuleDefinition::threshold("cost", "cost", "greater_than", 10.0))
        .expect("valid rule");
    engine
        .create_rule(RuleDefinition::threshold("idle", "utilization", "less_than", 0.5))
        .expect("valid rule");

    let now = Utc::now();
    let sample = MetricSample {
        total_cost: f64::NAN,
        utilization_rate: Some(0.1),
        ..MetricSample::empty("gpu-01", TargetScope::Asset, now)
    };
    let report = engine.evaluate(&[sample], &store, now);

    assert_eq!(report.errors.len(), 1);
    assert!(matches!(report.errors[0], AlertError::Evaluation { .. }));
    let fired: Vec<&Alert> = report.fired().collect();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].metric_type, MetricType::UtilizationRate);
}

#[test]
fn active_alert_blocks_a_second_one_for_same_target() {
    let mut engine = AlertRuleEngine::new();
    let mut store = AlertStore::new();
    engine.create_rule(gpu_rule(1)).expect("valid rule");

    let start = Utc::now();
    let fired = tick(&mut engine, &mut store, &[cost_sample("gpu-01", 1500.0, start)], start);
    assert_eq!(fired.len(), 1);

    let now = start + Duration::seconds(60);
    let fired = tick(
        &mut engine,
        &mut store,
        &[cost_sample("gpu-01", 1500.0, now), cost_sample("gpu-02", 1500.0, now)],
        now,
    );
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].target_id, "gpu-02");
    assert_eq!(store.active_count(), 2);
}

#[test]
fn rule_targets_support_globs_and_scope() {
    let mut engine = AlertRuleEngine::new();
    let mut store = AlertStore::new();
    engine
        .create_rule(RuleDefinition {
            target_ids: vec!["gpu-*".into()],
            scope: Some(TargetScope::Asset),
            ..gpu_rule(1)
        })
        .expect("valid rule");

    let now = Utc::now();
    let project = MetricSample {
        total_cost: 5000.0,
        ..MetricSample::empty("gpu-cluster", TargetScope::Project, now)
    };
    let samples = vec![
        cost_sample("gpu-07", 1500.0, now),
        cost_sample("cpu-01", 1500.0, now),
        project,
    ];
    let fired = tick(&mut engine, &mut store, &samples, now);

    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].target_id, "gpu-07");
}

#[test]
fn alert_recovers_after_healthy_ticks() {
    let mut engine = AlertRuleEngine::new();
    let mut store = AlertStore::new();
    engine
        .create_rule(RuleDefinition {
            recovery_ticks: 2,
            ..gpu_rule(1)
        })
        .expect("valid rule");

    let start = Utc::now();
    let fired = tick(&mut engine, &mut store, &[cost_sample("gpu-01", 1500.0, start)], start);
    let alert_id = fired[0].alert_id.clone();

    let t1 = start + Duration::seconds(60);
    let report = engine.evaluate(&[cost_sample("gpu-01", 500.0, t1)], &store, t1);
    assert!(report.outputs.is_empty());

    let t2 = start + Duration::seconds(120);
    let report = engine.evaluate(&[cost_sample("gpu-01", 500.0, t2)], &store, t2);
    assert_eq!(
        report.outputs,
        vec![AlertOutput::Recovered {
            alert_id,
            rule_id: fired[0].rule_id.clone(),
            target_id: "gpu-01".into(),
        }]
    );
}

#[test]
fn disabled_rule_is_not_evaluated() {
    let mut engine = AlertRuleEngine::new();
    let store = AlertStore::new();
    engine
        .create_rule(RuleDefinition {
            enabled: false,
            ..gpu_rule(1)
        })
        .expect("valid rule");

    let now = Utc::now();
    let report = engine.evaluate(&[cost_sample("gpu-01", 5000.0, now)], &store, now);
    assert_eq!(report.skipped, 1);
    assert!(report.outputs.is_empty());
    assert_eq!(engine.enabled_count(), 0);
}

#[test]
fn rule_definition_json_defaults() {
    let definition: RuleDefinition = serde_json::from_str(
        r#"{
            "name": "Project budget",
            "metric_type": "budget_utilization",
            "comparison_operator": "gt",
            "threshold_value": 0.9,
            "severity": "critical"
        }"#,
    )
    .expect("parse");

    assert_eq!(definition.evaluation_window_secs, 900);
    assert_eq!(definition.consecutive_breaches_required, 1);
    assert!(definition.enabled);
    assert_eq!(definition.severity, Severity::Critical);

    let rule = definition.build("rule-1".into()).expect("valid");
    assert_eq!(rule.metric, MetricType::BudgetUtilization);
    assert_eq!(rule.operator, CompareOp::GreaterThan);
    assert_eq!(rule.to_definition().comparison_operator, "greater_than");
}

fn active_alert(rule_id: &str, target: &str) -> Alert {
    let now = Utc::now();
    Alert {
        alert_id: costmon_common::id::next_alert_id(),
        rule_id: rule_id.into(),
        rule_name: "GPU cost".into(),
        severity: Severity::Warning,
        alert_type: AlertType::CostThreshold,
        target_id: target.into(),
        target_scope: TargetScope::Asset,
        metric_type: MetricType::TotalCost,
        current_value: 1500.0,
        threshold_value: 1000.0,
        message: "total_cost above threshold".into(),
        triggered_at: now,
        acknowledged_at: None,
        acknowledged_by: None,
        resolved_at: None,
        resolution_note: None,
        is_active: true,
        suggested_actions: Vec::new(),
    }
}

#[test]
fn store_enforces_one_active_alert_per_rule_and_target() {
    let mut store = AlertStore::new();
    store.insert(active_alert("r1", "gpu-01")).expect("first");
    let err = store.insert(active_alert("r1", "gpu-01")).unwrap_err();
    assert!(matches!(err, AlertError::DuplicateActiveAlert { .. }));
    store.insert(active_alert("r2", "gpu-01")).expect("other rule");
    assert_eq!(store.active_count(), 2);
}

#[test]
fn store_acknowledge_and_resolve_transitions() {
    let mut store = AlertStore::new();
    let alert = active_alert("r1", "gpu-01");
    let alert_id = alert.alert_id.clone();
    store.insert(alert).expect("insert");
    let now = Utc::now();

    let acked = store.acknowledge(&alert_id, "ops", now).expect("ack");
    assert_eq!(acked.acknowledged_by.as_deref(), Some("ops"));
    assert!(acked.is_active);
    assert_eq!(
        store.acknowledge(&alert_id, "ops", now),
        Err(AlertError::AlertAlreadyAcknowledged(alert_id.clone()))
    );

    let resolved = store.resolve(&alert_id, "scaled down", now).expect("resolve");
    assert!(!resolved.is_active);
    assert_eq!(resolved.resolution_note.as_deref(), Some("scaled down"));
    assert!(store.active_for("r1", "gpu-01").is_none());
    assert!(store.list_active().is_empty());

    assert_eq!(
        store.resolve(&alert_id, "again", now),
        Err(AlertError::AlertAlreadyResolved(alert_id.clone()))
    );
    assert_eq!(
        store.acknowledge(&alert_id, "ops", now),
        Err(AlertError::AlertAlreadyResolved(alert_id.clone()))
    );
    assert_eq!(
        store.resolve("alert-missing", "x", now),
        Err(AlertError::AlertNotFound("alert-missing".into()))
    );

    // The pair is free again once resolved.
    store.insert(active_alert("r1", "gpu-01")).expect("new active alert");
}

#[test]
fn store_prune_keeps_active_alerts() {
    let mut store = AlertStore::new();
    let now = Utc::now();
    for i in 0..4 {
        let alert = active_alert("r1", &format!("gpu-{i}"));
        let alert_id = alert.alert_id.clone();
        store.insert(alert).expect("insert");
        if i < 3 {
            store
                .resolve(&alert_id, "done", now - Duration::days(i))
                .expect("resolve");
        }
    }

    // Resolved 2 days ago falls outside a 36 hour retention.
    assert_eq!(store.prune(now, Duration::hours(36), 100), 1);
    assert_eq!(store.len(), 3);

    // Cap of 1 drops the remaining resolved alerts, never the active one.
    assert_eq!(store.prune(now, Duration::hours(36), 1), 2);
    assert_eq!(store.len(), 1);
    assert_eq!(store.active_count(), 1);
    assert_eq!(store.active_by_severity().get(&Severity::Warning), Some(&1));
}

fn cost_series(target: &str, costs: &[f64], end: DateTime<Utc>) -> Vec<MetricSample> {
    let n = costs.len() as i64;
    costs
        .iter()
        .enumerate()
        .map(|(i, cost)| cost_sample(target, *cost, end - Duration::minutes(n - 1 - i as i64)))
        .collect()
}

fn spike_costs(recent: f64) -> Vec<f64> {
    let mut costs = vec![100.0; 7];
    costs.extend([recent; 3]);
    costs
}

#[test]
fn spike_detector_flags_recent_mean_over_twice_baseline() {
    let mut detector = AnomalyDetector::new(AnomalyConfig::default());
    let store = AlertStore::new();
    let now = Utc::now();

    let alerts = detector.detect(&cost_series("gpu-01", &spike_costs(250.0), now), &store, now);

    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.alert_type, AlertType::CostSpike);
    assert_eq!(alert.rule_id, anomaly_rule_id(AlertType::CostSpike));
    assert!((alert.current_value - 250.0).abs() < 1e-9);
    assert!((alert.threshold_value - 200.0).abs() < 1e-9);
    assert_eq!(alert.severity, Severity::Warning);
    assert!(alert.message.contains("flat baseline"));
}

#[test]
fn spike_detector_ignores_moderate_rise() {
    let mut detector = AnomalyDetector::new(AnomalyConfig::default());
    let store = AlertStore::new();
    let now = Utc::now();

    let alerts = detector.detect(&cost_series("gpu-01", &spike_costs(150.0), now), &store, now);
    assert!(alerts.is_empty());
}

#[test]
fn detector_needs_minimum_samples() {
    let mut detector = AnomalyDetector::new(AnomalyConfig::default());
    let store = AlertStore::new();
    let now = Utc::now();

    let costs = [100.0, 100.0, 100.0, 100.0, 100.0, 900.0, 900.0, 900.0];
    assert!(detector.detect(&cost_series("gpu-01", &costs, now), &store, now).is_empty());
}

#[test]
fn detector_dedups_by_active_alert_and_cooldown() {
    let mut detector = AnomalyDetector::new(AnomalyConfig::default());
    let mut store = AlertStore::new();
    let now = Utc::now();
    let samples = cost_series("gpu-01", &spike_costs(400.0), now);

    let first = detector.detect(&samples, &store, now);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].severity, Severity::Critical);
    let alert_id = first[0].alert_id.clone();
    store.insert(first[0].clone()).expect("insert");

    let later = now + Duration::minutes(1);
    assert!(detector.detect(&samples, &store, later).is_empty());

    // Resolved but still inside the cooldown.
    store.resolve(&alert_id, "checked", later).expect("resolve");
    assert!(detector.detect(&samples, &store, later).is_empty());

    let after_cooldown = now + Duration::minutes(31);
    assert_eq!(detector.detect(&samples, &store, after_cooldown).len(), 1);
}

#[test]
fn zero_cooldown_re_emits_while_no_alert_is_active() {
    let mut detector = AnomalyDetector::new(AnomalyConfig {
        cooldown_secs: 0,
        ..AnomalyConfig::default()
    });
    let store = AlertStore::new();
    let now = Utc::now();
    let samples = cost_series("gpu-01", &spike_costs(250.0), now);

    assert_eq!(detector.detect(&samples, &store, now).len(), 1);
    assert_eq!(detector.detect(&samples, &store, now).len(), 1);
}

#[test]
fn efficiency_drop_and_low_utilization() {
    let mut detector = AnomalyDetector::new(AnomalyConfig::default());
    let store = AlertStore::new();
    let now = Utc::now();

    let samples: Vec<MetricSample> = (0..10)
        .map(|i| MetricSample {
            total_cost: 100.0,
            power_usage_effectiveness: Some(if i < 7 { 1.4 } else { 1.9 }),
            utilization_rate: Some(0.1),
            ..MetricSample::empty("rack-3", TargetScope::Asset, now - Duration::minutes(10 - i))
        })
        .collect();

    let alerts = detector.detect(&samples, &store, now);
    let types: Vec<AlertType> = alerts.iter().map(|a| a.alert_type).collect();
    assert_eq!(types, vec![AlertType::EfficiencyDrop, AlertType::UtilizationLow]);

    let efficiency = &alerts[0];
    assert!((efficiency.current_value - 1.9).abs() < 1e-9);
    assert!((efficiency.threshold_value - 1.68).abs() < 1e-9);
    assert_eq!(alerts[1].severity, Severity::Info);
}

#[test]
fn disabled_detector_emits_nothing() {
    let mut detector = AnomalyDetector::new(AnomalyConfig {
        enabled: false,
        ..AnomalyConfig::default()
    });
    let store = AlertStore::new();
    let now = Utc::now();
    assert!(detector
        .detect(&cost_series("gpu-01", &spike_costs(900.0), now), &store, now)
        .is_empty());
}
