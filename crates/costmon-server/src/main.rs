use anyhow::Result;
use costmon_common::types::TargetScope;
use costmon_server::config::MonitorConfig;
use costmon_server::rule_seed;
use costmon_server::sources::build_static_sources;
use costmon_server::state::AppState;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  costmon-server [run] [config.toml]              Start the monitoring loop");
    eprintln!("  costmon-server check-rules <rules.json>         Validate a rules seed file");
    eprintln!("  costmon-server summary <config.toml> [days]     Print a cost summary of the configured targets");
}

const DEFAULT_CONFIG_PATH: &str = "config/costmon.toml";

#[tokio::main]
async fn main() -> Result<()> {
    costmon_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("costmon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("check-rules") => {
            let rules_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("check-rules requires a <rules.json> argument")
            })?;
            run_check_rules(rules_path)
        }
        Some("summary") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("summary requires a <config.toml> argument")
            })?;
            let days = match args.get(3) {
                Some(d) => d
                    .parse::<u32>()
                    .map_err(|e| anyhow::anyhow!("Invalid days '{d}': {e}"))?,
                None => 7,
            };
            run_summary(config_path, days).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        Some("run") => run_monitor(args.get(2).map_or(DEFAULT_CONFIG_PATH, |s| s.as_str())).await,
        _ => run_monitor(args.get(1).map_or(DEFAULT_CONFIG_PATH, |s| s.as_str())).await,
    }
}

#[allow(clippy::print_stdout)]
fn run_check_rules(rules_path: &str) -> Result<()> {
    let seed = rule_seed::load_rules_file(rules_path)?;
    let problems = seed.validate();
    if problems.is_empty() {
        println!("{}: {} rules OK", rules_path, seed.rules.len());
        return Ok(());
    }
    for problem in &problems {
        println!("{rules_path}: {problem}");
    }
    anyhow::bail!("{} of {} rules are invalid", problems.len(), seed.rules.len())
}

#[allow(clippy::print_stdout)]
async fn run_summary(config_path: &str, days: u32) -> Result<()> {
    let config = MonitorConfig::load(config_path)?;
    let targets = config.monitored_targets();
    anyhow::ensure!(!targets.is_empty(), "No targets configured in '{config_path}'");

    let scope = targets.first().map_or(TargetScope::Asset, |t| t.scope);
    let target_ids = targets.into_iter().map(|t| t.id).collect();
    let adapters = build_static_sources(&config.sources);
    let state = AppState::build(config, adapters);

    let summary = state
        .orchestrator
        .quick_summary(scope, target_ids, days)
        .await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_monitor(config_path: &str) -> Result<()> {
    let config = MonitorConfig::load(config_path)?;
    tracing::info!(
        config = config_path,
        targets = config.targets.len(),
        sources = config.sources.len(),
        tick_interval_secs = config.tick_interval_secs,
        "Loaded configuration"
    );
    if config.targets.is_empty() {
        tracing::warn!("No targets configured, ticks will collect nothing");
    }

    let adapters = build_static_sources(&config.sources);
    let state = AppState::build(config, adapters);
    rule_seed::seed_rules(&state.config, &state.monitor)?;

    let mut subscription = state.monitor.subscribe();
    let listener = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match event.alert() {
                Some(alert) => tracing::info!(
                    event = event.kind(),
                    alert_id = %alert.alert_id,
                    target_id = %alert.target_id,
                    severity = %alert.severity,
                    message = %alert.message,
                    "Monitoring event"
                ),
                None => tracing::debug!(event = event.kind(), "Monitoring event"),
            }
        }
    });

    state.scheduler.start();
    tracing::info!("Cost monitor running, press Ctrl+C to stop");

    signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    state.scheduler.stop().await;
    listener.abort();
    tracing::info!("Cost monitor stopped");
    Ok(())
}
