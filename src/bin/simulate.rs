//! Drive the monitor with synthetic checks and report pipeline counters
//!
//! Usage: simulate [entities] [seconds]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conmon::alerts::{Alert, AlertHandler, HandlerError};
use conmon::monitor::{
    CheckError, ContinuousMonitor, MetricCollector, MetricData, StaticEntitySource,
    ValidationResult, Validator,
};
use conmon::{telemetry, MonitorConfig, NoisePolicy, Severity, Violation};
use rand::Rng;
use tokio_util::sync::CancellationToken;

const RESOURCES: &[&str] = &["vm-01", "vm-02", "bucket-logs", "db-primary", "lb-edge", "iam-root"];
const FINDINGS: &[&str] = &[
    "Encryption at rest disabled",
    "MFA not enforced",
    "Unpatched kernel",
    "Public network exposure",
    "Audit logging gap",
];

/// Scores mostly in the passing range, with occasional violations
struct RandomValidator {
    failure_rate: f64,
    max_latency_ms: u64,
}

#[async_trait]
impl Validator for RandomValidator {
    fn name(&self) -> &str {
        "random"
    }

    async fn validate(
        &self,
        cancel: &CancellationToken,
        _entity_id: &str,
    ) -> Result<ValidationResult, CheckError> {
        let (latency, score, violations, error) = {
            let mut rng = rand::thread_rng();
            let latency = Duration::from_millis(rng.gen_range(1..=self.max_latency_ms));
            let score: f64 = rng.gen_range(85.0..100.0);
            let violations: Vec<Violation> = if rng.gen_bool(self.failure_rate) {
                let severity = match rng.gen_range(0..4) {
                    0 => Severity::Critical,
                    1 => Severity::High,
                    2 => Severity::Medium,
                    _ => Severity::Low,
                };
                vec![Violation::new(
                    severity,
                    FINDINGS[rng.gen_range(0..FINDINGS.len())],
                    RESOURCES[rng.gen_range(0..RESOURCES.len())],
                    "Remediate and re-run validation",
                )]
            } else {
                Vec::new()
            };
            (latency, score, violations, rng.gen_bool(0.02))
        };

        tokio::select! {
            _ = tokio::time::sleep(latency) => {}
            _ = cancel.cancelled() => return Err(CheckError::Cancelled),
        }

        if error {
            return Err(CheckError::Unavailable("synthetic upstream timeout".to_string()));
        }
        Ok(ValidationResult::from_violations(score, violations)
            .with_detail("latencyMs", latency.as_millis() as u64))
    }
}

struct RandomCollector;

#[async_trait]
impl MetricCollector for RandomCollector {
    fn name(&self) -> &str {
        "random"
    }

    async fn collect(
        &self,
        _cancel: &CancellationToken,
        entity_id: &str,
    ) -> Result<MetricData, CheckError> {
        let value = rand::thread_rng().gen_range(20.0..500.0);
        Ok(MetricData::new("api_response_time", value, "ms").with_label("cso_id", entity_id))
    }
}

/// Counts alerts and sleeps a little to model a remote endpoint
#[derive(Default)]
struct CountingHandler {
    handled: AtomicU64,
    critical: AtomicU64,
}

#[async_trait]
impl AlertHandler for CountingHandler {
    fn name(&self) -> &str {
        "counting"
    }

    async fn handle(&self, alert: &Alert) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.handled.fetch_add(1, Ordering::Relaxed);
        if alert.severity == Severity::Critical {
            self.critical.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let entity_count: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(200);
    let seconds: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);

    let config = MonitorConfig::default()
        .with_validation_interval(Duration::from_millis(500))
        .with_metric_interval(Duration::from_millis(250))
        .with_queue_capacity(256)
        .with_aggregation(Duration::from_secs(5), 3, NoisePolicy::Escalate);

    println!("conmon simulation");
    println!("=================");
    println!("Entities:        {}", entity_count);
    println!("Duration:        {}s", seconds);
    println!("Max in flight:   {}", config.max_in_flight_checks);
    println!("Queue capacity:  {}", config.queue_capacity);
    println!();

    let entities = Arc::new(StaticEntitySource::new(
        (0..entity_count).map(|i| format!("CSO-{:04}", i)),
    ));
    let monitor = ContinuousMonitor::builder(config, entities).build()?;

    monitor.register_validator(
        "configuration",
        Arc::new(RandomValidator {
            failure_rate: 0.05,
            max_latency_ms: 400,
        }),
    );
    monitor.register_validator(
        "vulnerability",
        Arc::new(RandomValidator {
            failure_rate: 0.02,
            max_latency_ms: 900,
        }),
    );
    monitor.register_collector("performance", Arc::new(RandomCollector));

    let handler = Arc::new(CountingHandler::default());
    monitor.register_handler("counting", handler.clone());

    let start = Instant::now();
    monitor.start()?;
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    monitor.stop().await;
    let elapsed = start.elapsed();

    let stats = monitor.stats();
    println!("Results ({:?})", elapsed);
    println!("  Validation ticks:  {}", stats.validation_ticks);
    println!("  Metric ticks:      {}", stats.metric_ticks);
    println!("  Checks completed:  {}", stats.checks_completed);
    println!("  Checks failed:     {}", stats.checks_failed);
    println!("  Checks skipped:    {} (still in flight)", stats.checks_skipped);
    println!("  Alerts raised:     {}", stats.alerts_raised);
    println!("  Alerts rejected:   {}", stats.alerts_rejected);
    println!("  Queue dropped:     {}", stats.queue.dropped);
    println!(
        "  Dispatched:        {} ({} critical)",
        handler.handled.load(Ordering::Relaxed),
        handler.critical.load(Ordering::Relaxed)
    );
    println!(
        "  Checks/sec:        {:.0}",
        stats.checks_completed as f64 / elapsed.as_secs_f64()
    );

    Ok(())
}
