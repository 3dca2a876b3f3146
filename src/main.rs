//! conmon daemon
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - CONMON_ENTITIES: Comma-separated entity IDs to monitor (e.g., "CSO-001,CSO-002")
//! - CONMON_VALIDATION_INTERVAL_SECS: Validation loop period (default: 300)
//! - CONMON_METRIC_INTERVAL_SECS: Metric loop period (default: 60)
//! - CONMON_ALERT_THRESHOLD: Scores below this raise alerts (default: 95.0)
//! - CONMON_QUEUE_CAPACITY: Alert queue capacity (default: 1000)
//! - CONMON_AGGREGATOR_WINDOW_SECS / CONMON_AGGREGATOR_THRESHOLD: Repetition window and count
//! - CONMON_NOISE_POLICY: off, escalate or suppress (default: off)
//! - CONMON_MAX_IN_FLIGHT: Concurrent check limit (default: 4 x CPUs)
//! - CONMON_ENABLED_CHECKS: Comma-separated validator names (default: all)
//! - CONMON_WEBHOOK_URL, CONMON_SLACK_WEBHOOK_URL, CONMON_PAGERDUTY_ROUTING_KEY: Alert targets
//! - CONMON_ALERT_EMAILS: Comma-separated recipients for the email handler
//! - RUST_LOG: Log level (default: conmon=info)
//!
//! Validators and collectors are registered by embedding applications through
//! the library; the daemon on its own delivers alerts submitted to it and
//! keeps both loops ticking.

use std::sync::Arc;

use conmon::alerts::NotifyConfig;
use conmon::monitor::{ContinuousMonitor, StaticEntitySource};
use conmon::{telemetry, MonitorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();

    let config = MonitorConfig::from_env()?;
    let entities = Arc::new(StaticEntitySource::from_csv(
        &std::env::var("CONMON_ENTITIES").unwrap_or_default(),
    ));

    tracing::info!("conmon configuration:");
    tracing::info!("  Validation interval: {:?}", config.validation_interval);
    tracing::info!("  Metric interval: {:?}", config.metric_interval);
    tracing::info!("  Alert threshold: {:.1}", config.alert_threshold);
    tracing::info!("  Queue capacity: {}", config.queue_capacity);
    tracing::info!(
        "  Aggregation: {} within {:?} ({})",
        config.aggregator_threshold,
        config.aggregator_window,
        config.noise_policy
    );
    tracing::info!("  Max in-flight checks: {}", config.max_in_flight_checks);
    match &config.enabled_checks {
        Some(checks) => tracing::info!("  Enabled checks: {}", checks.join(", ")),
        None => tracing::info!("  Enabled checks: all"),
    }

    let monitor = ContinuousMonitor::builder(config, entities).build()?;
    NotifyConfig::from_env().register(monitor.handlers());

    monitor.start()?;
    tracing::info!("Monitoring started, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    monitor.stop().await;

    let stats = monitor.stats();
    tracing::info!(
        alerts_raised = stats.alerts_raised,
        alerts_dispatched = stats.dispatch.alerts_processed,
        checks_completed = stats.checks_completed,
        checks_failed = stats.checks_failed,
        "conmon stopped"
    );

    Ok(())
}
