//! Alert queue consumer
//!
//! A single worker drains the [`AlertQueue`] one alert at a time. Each alert is
//! handed to a snapshot of every registered handler concurrently, and the
//! worker waits for all of them before taking the next alert. A slow handler
//! therefore delays every alert behind it; alerts are never pipelined across
//! handlers so that FIFO order holds end to end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::handler::HandlerRegistry;
use super::model::Alert;
use super::queue::{AlertQueue, AlertReceiver};

/// Outcome of fanning one alert out to the handler snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub alert_id: String,
    /// Number of handlers in the snapshot
    pub attempted: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Cumulative dispatcher counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchStats {
    pub alerts_processed: u64,
    pub handler_successes: u64,
    pub handler_failures: u64,
}

#[derive(Default)]
struct DispatchCounters {
    alerts_processed: AtomicU64,
    handler_successes: AtomicU64,
    handler_failures: AtomicU64,
}

impl DispatchCounters {
    fn record(&self, report: &DispatchReport) {
        self.alerts_processed.fetch_add(1, Ordering::Relaxed);
        self.handler_successes
            .fetch_add(report.succeeded.len() as u64, Ordering::Relaxed);
        self.handler_failures
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
    }
}

enum Worker {
    /// Not started; the receiver is still ours
    Idle(AlertReceiver),
    Running(JoinHandle<()>),
    Stopped,
}

/// Single-consumer alert dispatcher
pub struct AlertDispatcher {
    queue: AlertQueue,
    handlers: Arc<HandlerRegistry>,
    worker: Mutex<Worker>,
    counters: Arc<DispatchCounters>,
}

impl AlertDispatcher {
    /// Create a dispatcher with its own bounded queue
    pub fn new(capacity: usize, handlers: Arc<HandlerRegistry>) -> Self {
        let (queue, receiver) = AlertQueue::bounded(capacity);
        Self {
            queue,
            handlers,
            worker: Mutex::new(Worker::Idle(receiver)),
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Producer handle for this dispatcher's queue
    pub fn queue(&self) -> &AlertQueue {
        &self.queue
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Enqueue an alert, see [`AlertQueue::enqueue`]
    pub fn send_alert(&self, alert: Alert) -> bool {
        self.queue.enqueue(alert)
    }

    /// Spawn the consumer task. Returns `false` if it was already started,
    /// stopped, or a stop is in progress.
    pub fn start(&self) -> bool {
        let Ok(mut worker) = self.worker.try_lock() else {
            tracing::warn!("Alert dispatcher busy, not starting");
            return false;
        };

        match std::mem::replace(&mut *worker, Worker::Stopped) {
            Worker::Idle(receiver) => {
                let handlers = Arc::clone(&self.handlers);
                let counters = Arc::clone(&self.counters);
                *worker = Worker::Running(tokio::spawn(Self::consume(
                    receiver, handlers, counters,
                )));
                true
            }
            other => {
                *worker = other;
                false
            }
        }
    }

    /// Close the queue and wait until every buffered alert has been
    /// dispatched. Safe to call more than once; concurrent callers all wait
    /// for the drain to finish.
    pub async fn stop(&self) {
        self.queue.close();

        let mut worker = self.worker.lock().await;
        match std::mem::replace(&mut *worker, Worker::Stopped) {
            Worker::Idle(receiver) => {
                // Never started: drain inline so buffered alerts still go out
                Self::consume(
                    receiver,
                    Arc::clone(&self.handlers),
                    Arc::clone(&self.counters),
                )
                .await;
            }
            Worker::Running(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Alert dispatcher task failed");
                }
            }
            Worker::Stopped => {}
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            alerts_processed: self.counters.alerts_processed.load(Ordering::Relaxed),
            handler_successes: self.counters.handler_successes.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
        }
    }

    async fn consume(
        mut receiver: AlertReceiver,
        handlers: Arc<HandlerRegistry>,
        counters: Arc<DispatchCounters>,
    ) {
        tracing::info!("Alert dispatcher started");

        while let Some(alert) = receiver.recv().await {
            let report = Self::dispatch(&handlers, alert).await;
            counters.record(&report);
        }

        tracing::info!("Alert dispatcher stopped");
    }

    /// Fan one alert out to every handler registered right now and wait for
    /// all of them. Handler errors and panics are logged, never propagated.
    pub async fn dispatch(handlers: &HandlerRegistry, alert: Alert) -> DispatchReport {
        tracing::info!(
            alert_id = %alert.id,
            severity = %alert.severity,
            entity_id = %alert.entity_id,
            "Processing alert"
        );

        let snapshot = handlers.snapshot();
        let alert = Arc::new(alert);

        let (names, tasks): (Vec<String>, Vec<JoinHandle<_>>) = snapshot
            .into_iter()
            .map(|(name, handler)| {
                let alert = Arc::clone(&alert);
                let task = tokio::spawn(async move { handler.handle(&alert).await });
                (name, task)
            })
            .unzip();

        let results = futures::future::join_all(tasks).await;

        let mut report = DispatchReport {
            alert_id: alert.id.clone(),
            attempted: names.len(),
            ..Default::default()
        };

        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => {
                    tracing::debug!(
                        handler = %name,
                        alert_id = %alert.id,
                        "Handler processed alert"
                    );
                    report.succeeded.push(name);
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        handler = %name,
                        alert_id = %alert.id,
                        error = %e,
                        "Handler failed for alert"
                    );
                    report.failed.push(name);
                }
                Err(e) => {
                    tracing::error!(
                        handler = %name,
                        alert_id = %alert.id,
                        error = %e,
                        "Handler task aborted"
                    );
                    report.failed.push(name);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::handler::{AlertHandler, HandlerError};
    use crate::alerts::model::Severity;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Records the title of every alert it sees
    struct RecordingHandler {
        name: String,
        seen: parking_lot::Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl AlertHandler for RecordingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, alert: &Alert) -> Result<(), HandlerError> {
            self.seen.lock().push(alert.title.clone());
            Ok(())
        }
    }

    /// Counts calls, optionally sleeping and failing
    struct CountingHandler {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingHandler {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AlertHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _alert: &Alert) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                Err(HandlerError::Other("simulated failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl AlertHandler for PanickingHandler {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn handle(&self, _alert: &Alert) -> Result<(), HandlerError> {
            panic!("handler bug");
        }
    }

    /// Registers a new handler from inside `handle`; deadlocks if dispatch
    /// held the registry lock across handler execution.
    struct RegisteringHandler {
        registry: Arc<HandlerRegistry>,
    }

    #[async_trait]
    impl AlertHandler for RegisteringHandler {
        fn name(&self) -> &str {
            "registering"
        }

        async fn handle(&self, alert: &Alert) -> Result<(), HandlerError> {
            self.registry.register(
                format!("late-{}", alert.title),
                CountingHandler::new(Duration::ZERO, false),
            );
            Ok(())
        }
    }

    fn make_alert(title: &str) -> Alert {
        Alert::new(Severity::Medium, title, "dispatch test", "CSO-001")
    }

    #[tokio::test]
    async fn test_all_dispatched_in_fifo_order() {
        let handlers = Arc::new(HandlerRegistry::new());
        let recorder = RecordingHandler::new("recorder");
        handlers.register("recorder", recorder.clone());

        let dispatcher = AlertDispatcher::new(100, Arc::clone(&handlers));
        assert!(dispatcher.start());
        assert!(!dispatcher.start());

        for i in 0..40 {
            assert!(dispatcher.send_alert(make_alert(&format!("alert-{}", i))));
        }
        dispatcher.stop().await;

        let expected: Vec<String> = (0..40).map(|i| format!("alert-{}", i)).collect();
        assert_eq!(recorder.seen(), expected);
        assert_eq!(dispatcher.stats().alerts_processed, 40);
    }

    #[tokio::test]
    async fn test_every_handler_invoked_once_despite_errors() {
        let handlers = HandlerRegistry::new();
        let ok = CountingHandler::new(Duration::ZERO, false);
        let failing = CountingHandler::new(Duration::ZERO, true);
        let other = CountingHandler::new(Duration::from_millis(5), false);
        handlers.register("ok", ok.clone());
        handlers.register("failing", failing.clone());
        handlers.register("other", other.clone());

        let report = AlertDispatcher::dispatch(&handlers, make_alert("x")).await;

        assert_eq!(ok.calls(), 1);
        assert_eq!(failing.calls(), 1);
        assert_eq!(other.calls(), 1);
        assert_eq!(report.attempted, 3);
        assert_eq!(report.failed, vec!["failing".to_string()]);
        assert_eq!(report.succeeded.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_failing_handler_bounds_alert_time() {
        let handlers = HandlerRegistry::new();
        let slow = CountingHandler::new(Duration::from_millis(500), true);
        let fast = CountingHandler::new(Duration::ZERO, false);
        handlers.register("slow", slow.clone());
        handlers.register("fast", fast.clone());

        let started = tokio::time::Instant::now();
        let report = AlertDispatcher::dispatch(&handlers, make_alert("slow")).await;
        let elapsed = started.elapsed();

        assert_eq!(slow.calls(), 1);
        assert_eq!(fast.calls(), 1);
        assert_eq!(report.failed, vec!["slow".to_string()]);
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_delays_following_alerts() {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register("slow", CountingHandler::new(Duration::from_millis(500), false));

        let dispatcher = AlertDispatcher::new(10, handlers);
        dispatcher.send_alert(make_alert("first"));
        dispatcher.send_alert(make_alert("second"));

        let started = tokio::time::Instant::now();
        dispatcher.start();
        dispatcher.stop().await;

        // Alerts are not pipelined: two alerts take two slow-handler rounds
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert_eq!(dispatcher.stats().alerts_processed, 2);
    }

    #[tokio::test]
    async fn test_stop_drains_buffered_alerts() {
        let handlers = Arc::new(HandlerRegistry::new());
        let counter = CountingHandler::new(Duration::from_millis(1), false);
        handlers.register("counter", counter.clone());

        let dispatcher = AlertDispatcher::new(50, handlers);
        for i in 0..25 {
            assert!(dispatcher.send_alert(make_alert(&format!("buffered-{}", i))));
        }

        dispatcher.start();
        dispatcher.stop().await;

        assert_eq!(counter.calls(), 25);
        assert!(dispatcher.queue().is_empty());
    }

    #[tokio::test]
    async fn test_stop_without_start_drains_inline() {
        let handlers = Arc::new(HandlerRegistry::new());
        let counter = CountingHandler::new(Duration::ZERO, false);
        handlers.register("counter", counter.clone());

        let dispatcher = AlertDispatcher::new(10, handlers);
        dispatcher.send_alert(make_alert("a"));
        dispatcher.send_alert(make_alert("b"));
        dispatcher.stop().await;

        assert_eq!(counter.calls(), 2);
        assert!(!dispatcher.start());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_rejects_late_alerts() {
        let handlers = Arc::new(HandlerRegistry::new());
        let dispatcher = AlertDispatcher::new(10, handlers);
        dispatcher.start();

        dispatcher.stop().await;
        tokio::time::timeout(Duration::from_secs(1), dispatcher.stop())
            .await
            .expect("second stop should return promptly");

        assert!(!dispatcher.send_alert(make_alert("late")));
        assert_eq!(dispatcher.queue().stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let handlers = Arc::new(HandlerRegistry::new());
        let counter = CountingHandler::new(Duration::ZERO, false);
        handlers.register("panicking", Arc::new(PanickingHandler));
        handlers.register("counter", counter.clone());

        let dispatcher = AlertDispatcher::new(10, handlers);
        dispatcher.start();
        dispatcher.send_alert(make_alert("one"));
        dispatcher.send_alert(make_alert("two"));
        dispatcher.stop().await;

        assert_eq!(counter.calls(), 2);
        let stats = dispatcher.stats();
        assert_eq!(stats.alerts_processed, 2);
        assert_eq!(stats.handler_failures, 2);
        assert_eq!(stats.handler_successes, 2);
    }

    #[tokio::test]
    async fn test_registry_mutation_during_dispatch() {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(
            "registering",
            Arc::new(RegisteringHandler {
                registry: Arc::clone(&handlers),
            }),
        );

        let report = tokio::time::timeout(
            Duration::from_secs(1),
            AlertDispatcher::dispatch(&handlers, make_alert("x")),
        )
        .await
        .expect("dispatch must not hold the registry lock");

        // The handler added mid-dispatch was not part of this alert's snapshot
        assert_eq!(report.attempted, 1);
        assert_eq!(handlers.len(), 2);
    }

    #[tokio::test]
    async fn test_no_handlers_still_processes() {
        let handlers = HandlerRegistry::new();
        let report = AlertDispatcher::dispatch(&handlers, make_alert("lonely")).await;
        assert_eq!(report.attempted, 0);
        assert!(report.failed.is_empty());
    }
}
