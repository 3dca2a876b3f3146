//! Continuous monitor: periodic validation and metric loops
//!
//! Each loop ticks on its own interval. A tick fetches the tracked entities
//! and launches one task per (entity, check) pair, then returns without
//! waiting for them, so slow checks never delay the next tick. Concurrency is
//! bounded by a shared semaphore, and a pair whose previous run is still
//! outstanding is skipped rather than run twice.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::checks::{
    CollectorRegistry, MetricCollector, ValidationResult, Validator, ValidatorRegistry,
};
use super::entities::EntitySource;
use super::store::{ResultStore, TracingStore};
use crate::alerts::{
    Alert, AlertAggregator, AlertDispatcher, AlertHandler, AlertQueue, DispatchStats,
    HandlerRegistry, QueueStats, Severity,
};
use crate::config::{ConfigError, MonitorConfig, NoisePolicy};

/// Which loop a check belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Validation,
    Metric,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Validation => "validation",
            CheckKind::Metric => "metric",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// What one tick launched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub entities: usize,
    pub launched: usize,
    /// Pairs skipped because their previous run was still in flight
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub state: MonitorState,
    pub validation_ticks: u64,
    pub metric_ticks: u64,
    pub checks_completed: u64,
    pub checks_failed: u64,
    pub checks_skipped: u64,
    pub alerts_raised: u64,
    pub alerts_suppressed: u64,
    pub alerts_rejected: u64,
    pub queue: QueueStats,
    pub dispatch: DispatchStats,
}

#[derive(Default)]
struct MonitorCounters {
    validation_ticks: AtomicU64,
    metric_ticks: AtomicU64,
    checks_completed: AtomicU64,
    checks_failed: AtomicU64,
    checks_skipped: AtomicU64,
    alerts_raised: AtomicU64,
    alerts_suppressed: AtomicU64,
    alerts_rejected: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CheckKey {
    kind: CheckKind,
    entity_id: String,
    check: String,
}

#[derive(Clone)]
enum Check {
    Validate(Arc<dyn Validator>),
    Collect(Arc<dyn MetricCollector>),
}

/// State shared by the loops, tick tasks and check tasks
struct MonitorContext {
    config: MonitorConfig,
    validators: Arc<ValidatorRegistry>,
    collectors: Arc<CollectorRegistry>,
    entities: Arc<dyn EntitySource>,
    store: Arc<dyn ResultStore>,
    queue: AlertQueue,
    aggregator: AlertAggregator,
    cancel: CancellationToken,
    limiter: Arc<Semaphore>,
    in_flight: DashMap<CheckKey, ()>,
    counters: MonitorCounters,
}

/// Removes a pair from the in-flight set when its task ends
struct InFlightGuard {
    ctx: Arc<MonitorContext>,
    key: CheckKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ctx.in_flight.remove(&self.key);
    }
}

/// Builder for [`ContinuousMonitor`]; registries default to empty and the
/// store to [`TracingStore`]
pub struct MonitorBuilder {
    config: MonitorConfig,
    entities: Arc<dyn EntitySource>,
    store: Arc<dyn ResultStore>,
    handlers: Arc<HandlerRegistry>,
    validators: Arc<ValidatorRegistry>,
    collectors: Arc<CollectorRegistry>,
}

impl MonitorBuilder {
    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_validators(mut self, validators: Arc<ValidatorRegistry>) -> Self {
        self.validators = validators;
        self
    }

    pub fn with_collectors(mut self, collectors: Arc<CollectorRegistry>) -> Self {
        self.collectors = collectors;
        self
    }

    pub fn build(self) -> Result<ContinuousMonitor, MonitorError> {
        self.config.validate()?;

        let dispatcher = AlertDispatcher::new(self.config.queue_capacity, self.handlers);
        let ctx = MonitorContext {
            queue: dispatcher.queue().clone(),
            aggregator: AlertAggregator::new(
                self.config.aggregator_window,
                self.config.aggregator_threshold,
            ),
            limiter: Arc::new(Semaphore::new(self.config.max_in_flight_checks)),
            config: self.config,
            validators: self.validators,
            collectors: self.collectors,
            entities: self.entities,
            store: self.store,
            cancel: CancellationToken::new(),
            in_flight: DashMap::new(),
            counters: MonitorCounters::default(),
        };

        Ok(ContinuousMonitor {
            ctx: Arc::new(ctx),
            dispatcher,
            state: Mutex::new(MonitorState::Idle),
            loops: Mutex::new(Vec::new()),
            stop_lock: tokio::sync::Mutex::new(()),
        })
    }
}

/// Periodic check scheduler feeding the alert dispatcher
pub struct ContinuousMonitor {
    ctx: Arc<MonitorContext>,
    dispatcher: AlertDispatcher,
    state: Mutex<MonitorState>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes concurrent `stop` calls
    stop_lock: tokio::sync::Mutex<()>,
}

impl ContinuousMonitor {
    pub fn builder(config: MonitorConfig, entities: Arc<dyn EntitySource>) -> MonitorBuilder {
        MonitorBuilder {
            config,
            entities,
            store: Arc::new(TracingStore),
            handlers: Arc::new(HandlerRegistry::new()),
            validators: Arc::new(ValidatorRegistry::new()),
            collectors: Arc::new(CollectorRegistry::new()),
        }
    }

    pub fn register_validator(&self, name: impl Into<String>, validator: Arc<dyn Validator>) {
        let name = name.into();
        tracing::info!(check = %name, validator = validator.name(), "Registering validator");
        self.ctx.validators.register(name, validator);
    }

    pub fn register_collector(&self, name: impl Into<String>, collector: Arc<dyn MetricCollector>) {
        let name = name.into();
        tracing::info!(check = %name, collector = collector.name(), "Registering collector");
        self.ctx.collectors.register(name, collector);
    }

    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn AlertHandler>) {
        let name = name.into();
        tracing::info!(handler = %name, "Registering alert handler");
        self.dispatcher.handlers().register(name, handler);
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.ctx.config
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn queue(&self) -> &AlertQueue {
        self.dispatcher.queue()
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        self.dispatcher.handlers()
    }

    pub fn validators(&self) -> &Arc<ValidatorRegistry> {
        &self.ctx.validators
    }

    pub fn collectors(&self) -> &Arc<CollectorRegistry> {
        &self.ctx.collectors
    }

    pub fn aggregator(&self) -> &AlertAggregator {
        &self.ctx.aggregator
    }

    /// Submit an externally built alert through the noise policy and queue.
    /// Returns whether it was enqueued.
    pub fn submit_alert(&self, alert: Alert) -> bool {
        Self::raise(&self.ctx, alert)
    }

    /// Launch the validation loop, the metric loop and the dispatcher
    pub fn start(&self) -> Result<(), MonitorError> {
        {
            let mut state = self.state.lock();
            match *state {
                MonitorState::Idle => *state = MonitorState::Running,
                MonitorState::Running | MonitorState::Stopping => {
                    return Err(MonitorError::AlreadyStarted)
                }
                MonitorState::Stopped => return Err(MonitorError::Stopped),
            }
        }

        tracing::info!(
            validators = self.ctx.validators.len(),
            collectors = self.ctx.collectors.len(),
            handlers = self.handlers().len(),
            "Starting continuous monitoring"
        );

        self.dispatcher.start();

        let mut loops = self.loops.lock();
        loops.push(Self::spawn_loop(Arc::clone(&self.ctx), CheckKind::Validation));
        loops.push(Self::spawn_loop(Arc::clone(&self.ctx), CheckKind::Metric));

        Ok(())
    }

    /// Cancel the loops, then drain every alert already queued. Checks still
    /// running are left to finish; alerts they raise afterwards are rejected.
    pub async fn stop(&self) {
        let _stopping = self.stop_lock.lock().await;

        {
            let mut state = self.state.lock();
            if *state == MonitorState::Stopped {
                return;
            }
            *state = MonitorState::Stopping;
        }

        tracing::info!("Stopping continuous monitoring");
        self.ctx.cancel.cancel();

        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Monitor loop task failed");
            }
        }

        self.dispatcher.stop().await;

        *self.state.lock() = MonitorState::Stopped;
        tracing::info!("Continuous monitoring stopped");
    }

    /// Run one validation tick now and wait for all of its checks
    pub async fn run_validations_now(&self) -> TickSummary {
        Self::run_tick(Arc::clone(&self.ctx), CheckKind::Validation).await
    }

    /// Run one metric tick now and wait for all of its checks
    pub async fn collect_metrics_now(&self) -> TickSummary {
        Self::run_tick(Arc::clone(&self.ctx), CheckKind::Metric).await
    }

    pub fn stats(&self) -> MonitorStats {
        let c = &self.ctx.counters;
        MonitorStats {
            state: self.state(),
            validation_ticks: c.validation_ticks.load(Ordering::Relaxed),
            metric_ticks: c.metric_ticks.load(Ordering::Relaxed),
            checks_completed: c.checks_completed.load(Ordering::Relaxed),
            checks_failed: c.checks_failed.load(Ordering::Relaxed),
            checks_skipped: c.checks_skipped.load(Ordering::Relaxed),
            alerts_raised: c.alerts_raised.load(Ordering::Relaxed),
            alerts_suppressed: c.alerts_suppressed.load(Ordering::Relaxed),
            alerts_rejected: c.alerts_rejected.load(Ordering::Relaxed),
            queue: self.queue().stats(),
            dispatch: self.dispatcher.stats(),
        }
    }

    fn spawn_loop(ctx: Arc<MonitorContext>, kind: CheckKind) -> JoinHandle<()> {
        let period = match kind {
            CheckKind::Validation => ctx.config.validation_interval,
            CheckKind::Metric => ctx.config.metric_interval,
        };

        tokio::spawn(async move {
            tracing::info!(kind = kind.as_str(), interval = ?period, "Monitor loop started");

            // First tick one full period after start
            let Some(first) = Instant::now().checked_add(period) else {
                tracing::error!(
                    kind = kind.as_str(),
                    interval = ?period,
                    "Interval out of range, loop not started"
                );
                return;
            };
            let mut ticker = time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::spawn(Self::run_tick(Arc::clone(&ctx), kind));
                    }
                }
            }

            tracing::info!(kind = kind.as_str(), "Monitor loop stopped");
        })
    }

    async fn run_tick(ctx: Arc<MonitorContext>, kind: CheckKind) -> TickSummary {
        let checks: Vec<(String, Check)> = match kind {
            CheckKind::Validation => {
                ctx.counters.validation_ticks.fetch_add(1, Ordering::Relaxed);
                ctx.aggregator.sweep(Utc::now());
                ctx.validators
                    .snapshot()
                    .into_iter()
                    .filter(|(name, _)| ctx.config.is_check_enabled(name))
                    .map(|(name, v)| (name, Check::Validate(v)))
                    .collect()
            }
            CheckKind::Metric => {
                ctx.counters.metric_ticks.fetch_add(1, Ordering::Relaxed);
                ctx.collectors
                    .snapshot()
                    .into_iter()
                    .map(|(name, c)| (name, Check::Collect(c)))
                    .collect()
            }
        };

        let entities = match ctx.entities.active_entities().await {
            Ok(entities) => entities,
            Err(e) => {
                tracing::error!(kind = kind.as_str(), error = %e, "Failed to fetch active entities");
                return TickSummary::default();
            }
        };

        let mut summary = TickSummary {
            entities: entities.len(),
            ..Default::default()
        };
        let mut tasks = Vec::new();

        'launch: for entity_id in &entities {
            for (name, check) in &checks {
                if ctx.cancel.is_cancelled() {
                    break 'launch;
                }

                let key = CheckKey {
                    kind,
                    entity_id: entity_id.clone(),
                    check: name.clone(),
                };
                match Self::launch(&ctx, key, check.clone()).await {
                    Some(task) => {
                        summary.launched += 1;
                        tasks.push(task);
                    }
                    None => summary.skipped += 1,
                }
            }
        }

        tracing::debug!(
            kind = kind.as_str(),
            entities = summary.entities,
            launched = summary.launched,
            skipped = summary.skipped,
            "Tick dispatched"
        );

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!(kind = kind.as_str(), error = %e, "Check task aborted");
            }
        }

        summary
    }

    /// Claim the pair and a concurrency permit, then spawn its check.
    /// Returns `None` if the pair is already running or the monitor stopped.
    async fn launch(ctx: &Arc<MonitorContext>, key: CheckKey, check: Check) -> Option<JoinHandle<()>> {
        match ctx.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => {
                ctx.counters.checks_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    kind = key.kind.as_str(),
                    entity_id = %key.entity_id,
                    check = %key.check,
                    "Previous run still in flight, skipping"
                );
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        let guard = InFlightGuard {
            ctx: Arc::clone(ctx),
            key,
        };

        let permit = tokio::select! {
            permit = Arc::clone(&ctx.limiter).acquire_owned() => permit.ok()?,
            _ = ctx.cancel.cancelled() => return None,
        };

        let ctx = Arc::clone(ctx);
        Some(tokio::spawn(async move {
            let _permit = permit;
            let entity_id = guard.key.entity_id.clone();
            let name = guard.key.check.clone();

            match check {
                Check::Validate(validator) => {
                    Self::execute_validation(&ctx, &entity_id, &name, validator.as_ref()).await
                }
                Check::Collect(collector) => {
                    Self::execute_collection(&ctx, &entity_id, &name, collector.as_ref()).await
                }
            }

            drop(guard);
        }))
    }

    async fn execute_validation(
        ctx: &MonitorContext,
        entity_id: &str,
        check: &str,
        validator: &dyn Validator,
    ) {
        let started = std::time::Instant::now();
        let result = match validator.validate(&ctx.cancel, entity_id).await {
            Ok(result) => result,
            Err(e) => {
                ctx.counters.checks_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(entity_id, check, error = %e, "Validation failed");
                return;
            }
        };
        ctx.counters.checks_completed.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            entity_id,
            check,
            valid = result.valid,
            score = result.score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Validation completed"
        );

        if let Err(e) = ctx.store.store_validation(entity_id, check, &result).await {
            tracing::error!(entity_id, check, error = %e, "Failed to store validation result");
        }

        if result.breaches(ctx.config.alert_threshold) {
            Self::raise(ctx, Self::validation_alert(entity_id, check, result));
        }
    }

    async fn execute_collection(
        ctx: &MonitorContext,
        entity_id: &str,
        check: &str,
        collector: &dyn MetricCollector,
    ) {
        let metric = match collector.collect(&ctx.cancel, entity_id).await {
            Ok(metric) => metric,
            Err(e) => {
                ctx.counters.checks_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(entity_id, check, error = %e, "Metric collection failed");
                return;
            }
        };
        ctx.counters.checks_completed.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = ctx.store.store_metric(entity_id, check, &metric).await {
            tracing::error!(entity_id, check, error = %e, "Failed to store metric");
        }
    }

    /// Alert for a result that is invalid or scored below the threshold.
    /// Severity is high, or critical when any violation is critical.
    fn validation_alert(entity_id: &str, check: &str, result: ValidationResult) -> Alert {
        let alert = Alert::new(
            Severity::High,
            format!("Validation failed for {}", check),
            format!(
                "Entity {} failed {} validation with score {:.2}",
                entity_id, check, result.score
            ),
            entity_id,
        )
        .with_violations(result.violations)
        .with_metadata("check", check)
        .with_metadata("score", result.score);

        match alert.max_violation_severity() {
            Some(Severity::Critical) => alert.with_severity(Severity::Critical),
            _ => alert,
        }
    }

    /// Apply the noise policy and enqueue
    fn raise(ctx: &MonitorContext, alert: Alert) -> bool {
        let alert = match ctx.config.noise_policy {
            NoisePolicy::Off => alert,
            NoisePolicy::Escalate => {
                let occurrences = ctx.aggregator.record_at(&alert, Utc::now());
                if occurrences >= ctx.aggregator.threshold() {
                    tracing::info!(
                        entity_id = %alert.entity_id,
                        title = %alert.title,
                        occurrences,
                        "Recurring alert escalated"
                    );
                    alert
                        .with_severity(Severity::Critical)
                        .with_metadata("aggregated", true)
                        .with_metadata("occurrences", occurrences as u64)
                } else {
                    alert
                }
            }
            NoisePolicy::Suppress => {
                let occurrences = ctx.aggregator.record_at(&alert, Utc::now());
                if occurrences < ctx.aggregator.threshold() {
                    ctx.counters.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        entity_id = %alert.entity_id,
                        title = %alert.title,
                        occurrences,
                        "Alert suppressed below repetition threshold"
                    );
                    return false;
                }
                alert.with_metadata("occurrences", occurrences as u64)
            }
        };

        if ctx.queue.enqueue(alert) {
            ctx.counters.alerts_raised.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            ctx.counters.alerts_rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Monitor already started")]
    AlreadyStarted,

    #[error("Monitor has been stopped")]
    Stopped,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
