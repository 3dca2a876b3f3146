//! Result persistence seam

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use super::checks::{MetricData, ValidationResult};

/// Where check results go
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn store_validation(
        &self,
        entity_id: &str,
        check: &str,
        result: &ValidationResult,
    ) -> Result<(), StoreError>;

    async fn store_metric(
        &self,
        entity_id: &str,
        check: &str,
        metric: &MetricData,
    ) -> Result<(), StoreError>;
}

/// Logs results at debug level as JSON
#[derive(Debug, Default)]
pub struct TracingStore;

#[async_trait]
impl ResultStore for TracingStore {
    async fn store_validation(
        &self,
        entity_id: &str,
        check: &str,
        result: &ValidationResult,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_string(result)?;
        tracing::debug!(entity_id, check, result = %data, "Storing validation result");
        Ok(())
    }

    async fn store_metric(
        &self,
        entity_id: &str,
        check: &str,
        metric: &MetricData,
    ) -> Result<(), StoreError> {
        tracing::debug!(
            entity_id,
            check,
            metric = %metric.name,
            value = metric.value,
            unit = %metric.unit,
            "Storing metric"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredValidation {
    pub entity_id: String,
    pub check: String,
    pub result: ValidationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMetric {
    pub entity_id: String,
    pub check: String,
    pub metric: MetricData,
}

/// Keeps the most recent results in memory, oldest evicted first
pub struct MemoryStore {
    capacity: usize,
    validations: Mutex<VecDeque<StoredValidation>>,
    metrics: Mutex<VecDeque<StoredMetric>>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            validations: Mutex::new(VecDeque::with_capacity(capacity)),
            metrics: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn validations(&self) -> Vec<StoredValidation> {
        self.validations.lock().iter().cloned().collect()
    }

    pub fn metrics(&self) -> Vec<StoredMetric> {
        self.metrics.lock().iter().cloned().collect()
    }

    fn push_bounded<T>(queue: &Mutex<VecDeque<T>>, capacity: usize, item: T) {
        let mut queue = queue.lock();
        if queue.len() == capacity {
            queue.pop_front();
        }
        queue.push_back(item);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn store_validation(
        &self,
        entity_id: &str,
        check: &str,
        result: &ValidationResult,
    ) -> Result<(), StoreError> {
        Self::push_bounded(
            &self.validations,
            self.capacity,
            StoredValidation {
                entity_id: entity_id.to_string(),
                check: check.to_string(),
                result: result.clone(),
            },
        );
        Ok(())
    }

    async fn store_metric(
        &self,
        entity_id: &str,
        check: &str,
        metric: &MetricData,
    ) -> Result<(), StoreError> {
        Self::push_bounded(
            &self.metrics,
            self.capacity,
            StoredMetric {
                entity_id: entity_id.to_string(),
                check: check.to_string(),
                metric: metric.clone(),
            },
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
