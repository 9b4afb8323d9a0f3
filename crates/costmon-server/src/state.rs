use crate::config::MonitorConfig;
use crate::monitor::CostMonitor;
use crate::scheduler::MonitoringScheduler;
use chrono::Duration;
use costmon_alert::anomaly::AnomalyDetector;
use costmon_calc::CalculationOrchestrator;
use costmon_collector::collector::MetricCollector;
use costmon_collector::history::MetricHistory;
use costmon_collector::CostSourceAdapter;
use costmon_notify::NotificationBroadcaster;
use std::sync::Arc;

/// Retention windows are capped at ten years.
const MAX_RETENTION_SECS: u64 = 10 * 365 * 24 * 3600;

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs.min(MAX_RETENTION_SECS)).unwrap_or(0))
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MonitorConfig>,
    pub monitor: Arc<CostMonitor>,
    pub scheduler: Arc<MonitoringScheduler>,
    pub orchestrator: Arc<CalculationOrchestrator>,
}

impl AppState {
    /// Wires the monitor, scheduler and orchestrator over one shared set of
    /// cost source adapters.
    pub fn build(config: MonitorConfig, adapters: Vec<Arc<dyn CostSourceAdapter>>) -> Self {
        let history = MetricHistory::new(config.history_capacity, seconds(config.history_retention_secs));
        let monitor = Arc::new(CostMonitor::new(
            history,
            AnomalyDetector::new(config.anomaly.clone()),
            NotificationBroadcaster::new(config.notify.queue_capacity),
            seconds(config.resolved_alert_retention_secs),
            config.max_alert_history,
        ));

        let collector = MetricCollector::new(
            adapters.clone(),
            config.collection_concurrency,
            config.adapter_timeout(),
        );
        let scheduler = Arc::new(MonitoringScheduler::new(
            Arc::clone(&monitor),
            collector,
            config.monitored_targets(),
            config.tick_interval(),
            config.tick_overrun_factor,
        ));
        let orchestrator = Arc::new(CalculationOrchestrator::new(adapters, config.calculation.clone()));

        Self {
            config: Arc::new(config),
            monitor,
            scheduler,
            orchestrator,
        }
    }
}
