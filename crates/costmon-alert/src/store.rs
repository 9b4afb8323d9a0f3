use crate::{AlertError, Result};
use chrono::{DateTime, Duration, Utc};
use costmon_common::types::{Alert, Severity};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Key: (rule_id, target_id)
type ActiveKey = (String, String);

/// Alert history in trigger order, plus an index of the active alert for
/// each (rule, target) pair.
#[derive(Debug, Default)]
pub struct AlertStore {
    alerts: VecDeque<Alert>,
    active: HashMap<ActiveKey, String>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly triggered alert.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::DuplicateActiveAlert`] if the rule already has
    /// an active alert for the same target.
    pub fn insert(&mut self, alert: Alert) -> Result<()> {
        let key = (alert.rule_id.clone(), alert.target_id.clone());
        if alert.is_active {
            if self.active.contains_key(&key) {
                return Err(AlertError::DuplicateActiveAlert {
                    rule_id: key.0,
                    target_id: key.1,
                });
            }
            self.active.insert(key, alert.alert_id.clone());
        }
        self.alerts.push_back(alert);
        Ok(())
    }

    pub fn active_for(&self, rule_id: &str, target_id: &str) -> Option<&Alert> {
        let alert_id = self
            .active
            .get(&(rule_id.to_string(), target_id.to_string()))?;
        self.get(alert_id)
    }

    pub fn get(&self, alert_id: &str) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.alert_id == alert_id)
    }

    fn get_mut(&mut self, alert_id: &str) -> Option<&mut Alert> {
        self.alerts.iter_mut().find(|a| a.alert_id == alert_id)
    }

    /// Active alerts, oldest first.
    pub fn list_active(&self) -> Vec<Alert> {
        self.alerts.iter().filter(|a| a.is_active).cloned().collect()
    }

    pub fn acknowledge(&mut self, alert_id: &str, by: &str, now: DateTime<Utc>) -> Result<Alert> {
        let alert = self
            .get_mut(alert_id)
            .ok_or_else(|| AlertError::AlertNotFound(alert_id.to_string()))?;
        if !alert.is_active {
            return Err(AlertError::AlertAlreadyResolved(alert_id.to_string()));
        }
        if alert.is_acknowledged() {
            return Err(AlertError::AlertAlreadyAcknowledged(alert_id.to_string()));
        }
        alert.mark_acknowledged(by, now);
        Ok(alert.clone())
    }

    pub fn resolve(&mut self, alert_id: &str, note: &str, now: DateTime<Utc>) -> Result<Alert> {
        let alert = self
            .get_mut(alert_id)
            .ok_or_else(|| AlertError::AlertNotFound(alert_id.to_string()))?;
        if !alert.is_active {
            return Err(AlertError::AlertAlreadyResolved(alert_id.to_string()));
        }
        alert.mark_resolved(note, now);
        let resolved = alert.clone();
        self.active
            .remove(&(resolved.rule_id.clone(), resolved.target_id.clone()));
        Ok(resolved)
    }

    /// Drops resolved alerts older than `retention`, then the oldest
    /// resolved alerts until at most `max_history` remain. Active alerts
    /// are never pruned.
    pub fn prune(&mut self, now: DateTime<Utc>, retention: Duration, max_history: usize) -> usize {
        let before = self.alerts.len();
        let cutoff = now - retention;
        self.alerts
            .retain(|a| a.is_active || a.resolved_at.is_some_and(|at| at >= cutoff));

        let mut excess = self.alerts.len().saturating_sub(max_history);
        if excess > 0 {
            self.alerts.retain(|a| {
                if excess > 0 && !a.is_active {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
        before - self.alerts.len()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for alert in self.alerts.iter().filter(|a| a.is_active) {
            *counts.entry(alert.severity).or_insert(0) += 1;
        }
        counts
    }
}
