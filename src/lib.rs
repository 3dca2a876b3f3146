//! conmon: continuous compliance monitoring core
//!
//! Periodically runs registered validators and metric collectors against a
//! set of tracked entities, turns failing validations into alerts, and
//! delivers those alerts through a bounded FIFO queue to every registered
//! handler.
//!
//! # Features
//!
//! - **Two independent loops**: validation and metric collection on their own intervals
//! - **Bounded fan-out**: a semaphore caps concurrently running checks
//! - **No overlap**: a check still running for an entity is not started again
//! - **Lossy queue**: enqueue never blocks; a full queue drops the alert
//! - **FIFO dispatch**: each alert reaches every handler before the next starts
//! - **Noise control**: repeated alerts can be escalated or suppressed
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use conmon::alerts::LogHandler;
//! use conmon::monitor::{ContinuousMonitor, StaticEntitySource};
//! use conmon::MonitorConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let entities = Arc::new(StaticEntitySource::new(["CSO-001", "CSO-002"]));
//! let monitor = ContinuousMonitor::builder(MonitorConfig::default(), entities).build()?;
//! monitor.register_handler("log", Arc::new(LogHandler));
//!
//! monitor.start()?;
//! tokio::signal::ctrl_c().await?;
//! monitor.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod config;
pub mod monitor;
pub mod registry;
pub mod telemetry;

pub use alerts::{Alert, AlertHandler, Severity, Violation};
pub use config::{ConfigError, MonitorConfig, NoisePolicy};
pub use monitor::{ContinuousMonitor, MonitorError, MonitorState};
pub use registry::Registry;
