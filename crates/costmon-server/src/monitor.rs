use chrono::{DateTime, Duration, Utc};
use costmon_alert::anomaly::AnomalyDetector;
use costmon_alert::engine::{AlertOutput, AlertRuleEngine};
use costmon_alert::rule::{RuleDefinition, RuleState};
use costmon_alert::store::AlertStore;
use costmon_alert::{AlertError, Result};
use costmon_collector::history::MetricHistory;
use costmon_common::types::{Alert, MetricSample, MonitoringEvent, MonitoringSummary, Severity};
use costmon_notify::{NotificationBroadcaster, Subscription};
use std::sync::{Mutex, MutexGuard};

/// Rule registry, alert store and detector share one lock.
struct AlertState {
    engine: AlertRuleEngine,
    store: AlertStore,
    detector: AnomalyDetector,
    last_summary: MonitoringSummary,
}

/// What the rule phase of a tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RulePhaseReport {
    pub fired: usize,
    pub recovered: usize,
    pub failed_rules: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub samples: usize,
    pub alerts: usize,
}

/// Owns the monitoring state and the subscriber fan-out. Every mutation goes
/// through these methods; the lock is never held across an `.await`.
pub struct CostMonitor {
    state: Mutex<AlertState>,
    history: MetricHistory,
    broadcaster: NotificationBroadcaster,
    alert_retention: Duration,
    max_alert_history: usize,
}

impl CostMonitor {
    pub fn new(
        history: MetricHistory,
        detector: AnomalyDetector,
        broadcaster: NotificationBroadcaster,
        alert_retention: Duration,
        max_alert_history: usize,
    ) -> Self {
        Self {
            state: Mutex::new(AlertState {
                engine: AlertRuleEngine::new(),
                store: AlertStore::new(),
                detector,
                last_summary: MonitoringSummary::default(),
            }),
            history,
            broadcaster,
            alert_retention,
            max_alert_history,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AlertState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn history(&self) -> &MetricHistory {
        &self.history
    }

    // ---- Rule API ----

    pub fn create_rule(&self, definition: RuleDefinition) -> Result<String> {
        self.lock().engine.create_rule(definition)
    }

    pub fn remove_rule(&self, rule_id: &str) -> Result<()> {
        self.lock().engine.remove_rule(rule_id).map(|_| ())
    }

    pub fn list_rules(&self) -> Vec<RuleDefinition> {
        self.lock().engine.rules().map(|r| r.to_definition()).collect()
    }

    pub fn rule_state(&self, rule_id: &str) -> Option<RuleState> {
        self.lock().engine.get_rule(rule_id).map(|r| r.state().clone())
    }

    pub fn rule_count(&self) -> usize {
        self.lock().engine.len()
    }

    // ---- Alert API ----

    pub fn list_active_alerts(&self) -> Vec<Alert> {
        self.lock().store.list_active()
    }

    pub fn get_alert(&self, alert_id: &str) -> Option<Alert> {
        self.lock().store.get(alert_id).cloned()
    }

    pub fn acknowledge_alert(&self, alert_id: &str, by: &str) -> Result<Alert> {
        let mut state = self.lock();
        let alert = state.store.acknowledge(alert_id, by, Utc::now())?;
        tracing::info!(alert_id, acknowledged_by = by, "Alert acknowledged");
        self.broadcaster
            .broadcast(&MonitoringEvent::AlertAcknowledged(alert.clone()));
        Ok(alert)
    }

    pub fn resolve_alert(&self, alert_id: &str, note: &str) -> Result<Alert> {
        let mut state = self.lock();
        let alert = state.store.resolve(alert_id, note, Utc::now())?;
        tracing::info!(alert_id, "Alert resolved");
        self.broadcaster
            .broadcast(&MonitoringEvent::AlertResolved(alert.clone()));
        Ok(alert)
    }

    // ---- Subscriptions ----

    /// Subscribes to every event. The first event is `initial`, carrying
    /// the active alerts and the latest summary.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_filtered(Severity::Info)
    }

    /// Like [`CostMonitor::subscribe`], dropping alert events below
    /// `min_severity`.
    pub fn subscribe_filtered(&self, min_severity: Severity) -> Subscription {
        // Registering under the lock keeps the snapshot and the live stream
        // gap-free.
        let state = self.lock();
        let initial = MonitoringEvent::Initial {
            active_alerts: state
                .store
                .list_active()
                .into_iter()
                .filter(|a| a.severity >= min_severity)
                .collect(),
            summary: state.last_summary.clone(),
        };
        self.broadcaster.subscribe_with(initial, min_severity)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.broadcaster.unsubscribe(subscription)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    // ---- Tick phases ----

    /// Runs every rule over `samples`, stores fired alerts, applies
    /// recoveries and broadcasts the resulting events.
    pub fn evaluate_rules(&self, samples: &[MetricSample], now: DateTime<Utc>) -> RulePhaseReport {
        let mut guard = self.lock();
        let state = &mut *guard;
        let report = state.engine.evaluate(samples, &state.store, now);

        let mut phase = RulePhaseReport {
            failed_rules: report.errors.len(),
            ..RulePhaseReport::default()
        };
        for output in report.outputs {
            match output {
                AlertOutput::Fired(alert) => {
                    if self.record_alert(&mut state.store, alert) {
                        phase.fired += 1;
                    }
                }
                AlertOutput::Recovered { alert_id, .. } => {
                    let note = "auto-resolved: metric back within threshold";
                    match state.store.resolve(&alert_id, note, now) {
                        Ok(alert) => {
                            tracing::info!(alert_id = %alert.alert_id, rule_id = %alert.rule_id, "Alert auto-resolved");
                            phase.recovered += 1;
                            self.broadcaster.broadcast(&MonitoringEvent::AlertResolved(alert));
                        }
                        Err(e) => tracing::warn!(alert_id = %alert_id, error = %e, "Auto-resolve failed"),
                    }
                }
            }
        }
        phase
    }

    /// Runs the anomaly heuristics over `samples`. Returns how many alerts
    /// were raised.
    pub fn detect_anomalies(&self, samples: &[MetricSample], now: DateTime<Utc>) -> usize {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut raised = 0;
        for alert in state.detector.detect(samples, &state.store, now) {
            if self.record_alert(&mut state.store, alert) {
                raised += 1;
            }
        }
        raised
    }

    fn record_alert(&self, store: &mut AlertStore, alert: Alert) -> bool {
        match store.insert(alert.clone()) {
            Ok(()) => {
                tracing::warn!(
                    alert_id = %alert.alert_id,
                    rule_id = %alert.rule_id,
                    target_id = %alert.target_id,
                    severity = %alert.severity,
                    current_value = alert.current_value,
                    threshold_value = alert.threshold_value,
                    "Alert triggered"
                );
                self.broadcaster.broadcast(&MonitoringEvent::AlertTriggered(alert));
                true
            }
            Err(AlertError::DuplicateActiveAlert { rule_id, target_id }) => {
                tracing::debug!(%rule_id, %target_id, "Duplicate active alert dropped");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to store alert");
                false
            }
        }
    }

    /// Drops expired samples, old resolved alerts and stale detector
    /// cooldowns.
    pub fn prune(&self, now: DateTime<Utc>) -> PruneReport {
        let samples = self.history.evict(now);
        let mut state = self.lock();
        let alerts = state
            .store
            .prune(now, self.alert_retention, self.max_alert_history);
        state.detector.prune(now);
        if samples > 0 || alerts > 0 {
            tracing::debug!(samples, alerts, "Pruned monitoring state");
        }
        PruneReport { samples, alerts }
    }

    /// Completes `summary` with the current rule and alert counts, keeps it
    /// for new subscribers and broadcasts it as an `update` event.
    pub fn publish_summary(&self, mut summary: MonitoringSummary) -> MonitoringSummary {
        let mut state = self.lock();
        summary.active_rules = state.engine.enabled_count();
        summary.active_alerts = state.store.active_count();
        summary.active_alerts_by_severity = state.store.active_by_severity();
        state.last_summary = summary.clone();
        self.broadcaster
            .broadcast(&MonitoringEvent::Update(summary.clone()));
        summary
    }

    pub fn last_summary(&self) -> MonitoringSummary {
        self.lock().last_summary.clone()
    }
}
