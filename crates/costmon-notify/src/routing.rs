use costmon_common::types::{MonitoringEvent, Severity};

/// Per-subscriber severity filter. Summary events (`initial`, `update`)
/// always pass; alert lifecycle events pass when the alert's severity is at
/// least `min_severity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityRoute {
    pub min_severity: Severity,
}

impl Default for SeverityRoute {
    fn default() -> Self {
        Self {
            min_severity: Severity::Info,
        }
    }
}

impl SeverityRoute {
    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }

    pub fn should_send(&self, event: &MonitoringEvent) -> bool {
        match event.alert() {
            Some(alert) => alert.severity >= self.min_severity,
            None => true,
        }
    }
}
