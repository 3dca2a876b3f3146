//! Continuous monitoring: check contracts, entity sources, result storage
//! and the periodic scheduler

pub mod checks;
pub mod entities;
pub mod scheduler;
pub mod store;

pub use checks::{
    CheckError, CollectorRegistry, MetricCollector, MetricData, ValidationResult, Validator,
    ValidatorRegistry,
};
pub use entities::{EntitySource, StaticEntitySource};
pub use scheduler::{
    CheckKind, ContinuousMonitor, MonitorBuilder, MonitorError, MonitorState, MonitorStats,
    TickSummary,
};
pub use store::{MemoryStore, ResultStore, StoreError, TracingStore};
