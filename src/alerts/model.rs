//! Alert data types

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert urgency, ordered `Low < Medium < High < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    /// Attachment colour used by chat handlers
    pub fn color(&self) -> &'static str {
        match self {
            Severity::Critical => "#FF0000",
            Severity::High => "#FF8C00",
            Severity::Medium => "#FFD700",
            Severity::Low => "#00FF00",
        }
    }

    /// PagerDuty Events v2 severity
    pub fn paging_severity(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "error",
            Severity::Medium => "warning",
            Severity::Low => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown severity: {0}")]
pub struct ParseSeverityError(pub String);

/// A single compliance finding attached to a result or alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub severity: Severity,
    pub description: String,
    /// Affected resource identifier
    pub resource: String,
    pub remediation: String,
}

impl Violation {
    pub fn new(
        severity: Severity,
        description: impl Into<String>,
        resource: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            description: description.into(),
            resource: resource.into(),
            remediation: remediation.into(),
        }
    }
}

/// Unit of work flowing through the alert pipeline.
///
/// The `id` stays empty until the alert is accepted by an
/// [`AlertQueue`](super::queue::AlertQueue); nothing else changes after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default)]
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// Owning entity
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Alert {
    /// Create a new alert stamped with the current time
    pub fn new(
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            severity,
            title: title.into(),
            description: description.into(),
            entity_id: entity_id.into(),
            timestamp: Utc::now(),
            violations: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Override the creation timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = violations;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Whether a queue has assigned an ID yet
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Highest severity among attached violations
    pub fn max_violation_severity(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }
}
