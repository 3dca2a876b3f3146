//! Check contracts: validators and metric collectors

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::alerts::Violation;
use crate::registry::Registry;

/// Outcome of validating one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// Compliance score, 0 to 100
    pub score: f64,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    /// Passing result with the given score
    pub fn passed(score: f64) -> Self {
        Self {
            valid: true,
            score,
            details: HashMap::new(),
            timestamp: Utc::now(),
            violations: Vec::new(),
        }
    }

    /// Result whose validity follows from its violations
    pub fn from_violations(score: f64, violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            score,
            details: HashMap::new(),
            timestamp: Utc::now(),
            violations,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Whether this result should raise an alert under `threshold`
    pub fn breaches(&self, threshold: f64) -> bool {
        !self.valid || self.score < threshold
    }
}

/// One collected measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricData {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl MetricData {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            timestamp: Utc::now(),
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Compliance check run against one entity per validation tick
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(
        &self,
        cancel: &CancellationToken,
        entity_id: &str,
    ) -> Result<ValidationResult, CheckError>;
}

/// Measurement taken from one entity per metric tick
#[async_trait]
pub trait MetricCollector: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(
        &self,
        cancel: &CancellationToken,
        entity_id: &str,
    ) -> Result<MetricData, CheckError>;
}

pub type ValidatorRegistry = Registry<dyn Validator>;
pub type CollectorRegistry = Registry<dyn MetricCollector>;

/// Check execution errors
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Check cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}
