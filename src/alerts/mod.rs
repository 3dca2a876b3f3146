//! Alert pipeline: model, bounded queue, dispatcher, handlers and the
//! repetition aggregator
//!
//! Producers enqueue [`Alert`]s without blocking; a single dispatcher drains
//! the queue in FIFO order and fans each alert out to every registered
//! [`AlertHandler`].

pub mod aggregator;
pub mod dispatcher;
pub mod handler;
pub mod model;
pub mod notifier;
pub mod queue;

pub use aggregator::{AggregationKey, AlertAggregator};
pub use dispatcher::{AlertDispatcher, DispatchReport, DispatchStats};
pub use handler::{AlertHandler, HandlerError, HandlerRegistry};
pub use model::{Alert, ParseSeverityError, Severity, Violation};
pub use notifier::{
    EmailHandler, LogHandler, NotifyConfig, PagerDutyHandler, SlackHandler, WebhookHandler,
};
pub use queue::{AlertQueue, AlertReceiver, QueueStats, DEFAULT_QUEUE_CAPACITY};
