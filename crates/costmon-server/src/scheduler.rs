use crate::monitor::CostMonitor;
use chrono::Utc;
use costmon_collector::collector::MetricCollector;
use costmon_common::types::{MonitoredTarget, MonitoringSummary, TimeRange};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

struct TickContext {
    monitor: Arc<CostMonitor>,
    collector: MetricCollector,
    targets: Vec<MonitoredTarget>,
    tick_interval: Duration,
    overrun_factor: u32,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives the monitoring loop: one supervised task that ticks at a fixed
/// interval until [`MonitoringScheduler::stop`] is called.
pub struct MonitoringScheduler {
    ctx: Arc<TickContext>,
    running: Mutex<Option<RunningLoop>>,
}

impl MonitoringScheduler {
    pub fn new(
        monitor: Arc<CostMonitor>,
        collector: MetricCollector,
        targets: Vec<MonitoredTarget>,
        tick_interval: Duration,
        overrun_factor: u32,
    ) -> Self {
        Self {
            ctx: Arc::new(TickContext {
                monitor,
                collector,
                targets,
                tick_interval: tick_interval.max(Duration::from_millis(1)),
                overrun_factor: overrun_factor.max(1),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn monitor(&self) -> &Arc<CostMonitor> {
        &self.ctx.monitor
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Starts the loop. Returns `false` (and does nothing) if it is already
    /// running.
    pub fn start(&self) -> bool {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::info!("Monitoring scheduler already running");
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let ctx = Arc::clone(&self.ctx);
        let handle = tokio::spawn(run_loop(ctx, shutdown_rx));
        *running = Some(RunningLoop { shutdown, handle });
        tracing::info!(
            tick_interval = ?self.ctx.tick_interval,
            targets = self.ctx.targets.len(),
            adapters = self.ctx.collector.adapters().len(),
            "Monitoring scheduler started"
        );
        true
    }

    /// Signals the loop to stop, cancelling the tick in progress, and waits
    /// for it to exit. A no-op when not running.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Monitoring loop ended abnormally");
        }
        tracing::info!("Monitoring scheduler stopped");
    }
}

async fn run_loop(ctx: Arc<TickContext>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(ctx.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        tick += 1;
        let started = Instant::now();
        let mut task = tokio::spawn(run_tick(Arc::clone(&ctx), tick, shutdown.clone()));
        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = shutdown.changed() => {
                task.abort();
                let _ = task.await;
                tracing::info!(tick, "Tick cancelled by shutdown");
                break;
            }
        };

        match joined {
            Ok(Some(summary)) => tracing::debug!(
                tick,
                samples = summary.samples_collected,
                active_alerts = summary.active_alerts,
                "Tick completed"
            ),
            Ok(None) => break,
            Err(e) => tracing::error!(tick, error = %e, "Tick failed, continuing with the next one"),
        }

        let elapsed = started.elapsed();
        let budget = ctx.tick_interval * ctx.overrun_factor;
        if elapsed > budget {
            tracing::warn!(
                tick,
                elapsed = ?elapsed,
                budget = ?budget,
                "Tick overran its budget"
            );
        }
    }

    tracing::info!("Monitoring loop exited");
}

fn cancelled(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// One tick: collect, evaluate rules, detect anomalies, prune, publish.
/// Returns `None` when shutdown was observed at a phase boundary.
async fn run_tick(
    ctx: Arc<TickContext>,
    tick: u64,
    shutdown: watch::Receiver<bool>,
) -> Option<MonitoringSummary> {
    let started = Instant::now();
    let now = Utc::now();
    let span = chrono::Duration::from_std(ctx.tick_interval).unwrap_or_else(|_| chrono::Duration::minutes(1));
    let range = TimeRange::trailing(span, now);

    let report = ctx.collector.collect(&ctx.targets, range).await;
    if cancelled(&shutdown) {
        return None;
    }
    let evicted = ctx.monitor.history().append(report.samples.clone());
    if evicted > 0 {
        tracing::debug!(evicted, "History at capacity, oldest samples evicted");
    }

    let snapshot = ctx.monitor.history().snapshot();
    let rules = ctx.monitor.evaluate_rules(&snapshot, now);
    if cancelled(&shutdown) {
        return None;
    }

    let anomalies = ctx.monitor.detect_anomalies(&snapshot, now);
    if cancelled(&shutdown) {
        return None;
    }

    ctx.monitor.prune(now);

    let latest: BTreeMap<&str, f64> = report
        .samples
        .iter()
        .map(|s| (s.target_id.as_str(), s.total_cost))
        .collect();
    let summary = MonitoringSummary {
        tick,
        generated_at: Some(now),
        targets_monitored: ctx.targets.len(),
        samples_collected: report.samples.len(),
        adapter_failures: report.failures.len(),
        total_cost: latest.values().sum(),
        alerts_triggered: rules.fired + anomalies,
        alerts_resolved: rules.recovered,
        tick_duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        ..MonitoringSummary::default()
    };
    if rules.failed_rules > 0 || !report.failures.is_empty() {
        tracing::warn!(
            tick,
            failed_rules = rules.failed_rules,
            adapter_failures = report.failures.len(),
            "Tick completed with partial failures"
        );
    }
    Some(ctx.monitor.publish_summary(summary))
}
