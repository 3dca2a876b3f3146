//! Alert delivery contract

use async_trait::async_trait;

use super::model::Alert;
use crate::registry::Registry;

/// A delivery channel for alerts (webhook, chat, paging, ...).
///
/// Failures are reported through the returned error; the dispatcher logs them
/// and carries on with the other handlers.
#[async_trait]
pub trait AlertHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, alert: &Alert) -> Result<(), HandlerError>;
}

/// Registered alert handlers, keyed by registration name
pub type HandlerRegistry = Registry<dyn AlertHandler>;

/// Alert delivery errors
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Endpoint returned status {0}")]
    Status(u16),

    #[error("Handler not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Other(String),
}
