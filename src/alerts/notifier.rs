//! Built-in alert handlers

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::handler::{AlertHandler, HandlerError, HandlerRegistry};
use super::model::{Alert, Severity};

/// Per-request timeout for HTTP handlers
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// PagerDuty Events v2 endpoint
pub const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Writes alerts to the tracing log
#[derive(Debug, Default)]
pub struct LogHandler;

#[async_trait]
impl AlertHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, alert: &Alert) -> Result<(), HandlerError> {
        tracing::warn!(
            alert_id = %alert.id,
            severity = %alert.severity,
            entity_id = %alert.entity_id,
            violations = alert.violations.len(),
            "Alert triggered: {}",
            alert.title
        );
        Ok(())
    }
}

/// POSTs the alert as JSON to an HTTP endpoint
pub struct WebhookHandler {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
}

impl WebhookHandler {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl AlertHandler for WebhookHandler {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn handle(&self, alert: &Alert) -> Result<(), HandlerError> {
        let mut request = self.client.post(&self.url).json(alert);

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(HandlerError::Status(response.status().as_u16()));
        }

        tracing::debug!(
            alert_id = %alert.id,
            url = %self.url,
            "Webhook notification sent"
        );

        Ok(())
    }
}

/// Posts to a chat incoming-webhook (Slack message format)
pub struct SlackHandler {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackHandler {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            webhook_url: webhook_url.into(),
        }
    }

    /// Message body with a severity-coloured attachment
    pub fn payload(alert: &Alert) -> serde_json::Value {
        json!({
            "text": format!("*{} Alert*: {}", alert.severity, alert.title),
            "attachments": [{
                "color": alert.severity.color(),
                "fields": [
                    { "title": "Entity", "value": alert.entity_id, "short": true },
                    { "title": "Time", "value": alert.timestamp.to_rfc3339(), "short": true },
                    { "title": "Description", "value": alert.description, "short": false },
                ],
            }],
        })
    }
}

#[async_trait]
impl AlertHandler for SlackHandler {
    fn name(&self) -> &str {
        "slack"
    }

    async fn handle(&self, alert: &Alert) -> Result<(), HandlerError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(alert))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HandlerError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Triggers a PagerDuty incident for critical alerts only
pub struct PagerDutyHandler {
    client: reqwest::Client,
    routing_key: String,
    events_url: String,
}

impl PagerDutyHandler {
    pub fn new(routing_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            routing_key: routing_key.into(),
            events_url: PAGERDUTY_EVENTS_URL.to_string(),
        }
    }

    /// Send events somewhere other than the public PagerDuty endpoint
    pub fn with_events_url(mut self, url: impl Into<String>) -> Self {
        self.events_url = url.into();
        self
    }

    pub fn should_page(alert: &Alert) -> bool {
        alert.severity == Severity::Critical
    }

    pub fn payload(&self, alert: &Alert) -> serde_json::Value {
        json!({
            "routing_key": self.routing_key,
            "event_action": "trigger",
            "dedup_key": alert.id,
            "payload": {
                "summary": alert.title,
                "source": "conmon",
                "severity": alert.severity.paging_severity(),
                "custom_details": {
                    "entity_id": alert.entity_id,
                    "description": alert.description,
                    "violations": alert.violations,
                },
            },
        })
    }
}

#[async_trait]
impl AlertHandler for PagerDutyHandler {
    fn name(&self) -> &str {
        "pagerduty"
    }

    async fn handle(&self, alert: &Alert) -> Result<(), HandlerError> {
        if !Self::should_page(alert) {
            return Ok(());
        }

        let response = self
            .client
            .post(&self.events_url)
            .json(&self.payload(alert))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HandlerError::Status(response.status().as_u16()));
        }

        tracing::info!(alert_id = %alert.id, "PagerDuty incident triggered");
        Ok(())
    }
}

/// Logs the message it would mail. No mail transport is wired in; an empty
/// recipient list is reported as [`HandlerError::NotConfigured`].
#[derive(Debug, Default)]
pub struct EmailHandler {
    recipients: Vec<String>,
}

impl EmailHandler {
    pub fn new<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipients: recipients.into_iter().map(Into::into).collect(),
        }
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Subject line: `[<SEVERITY>] <title>`
    pub fn subject(alert: &Alert) -> String {
        format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title)
    }
}

#[async_trait]
impl AlertHandler for EmailHandler {
    fn name(&self) -> &str {
        "email"
    }

    async fn handle(&self, alert: &Alert) -> Result<(), HandlerError> {
        if self.recipients.is_empty() {
            return Err(HandlerError::NotConfigured("no email recipients".to_string()));
        }

        tracing::info!(
            alert_id = %alert.id,
            recipients = ?self.recipients,
            "Email notification (no transport): {}",
            Self::subject(alert)
        );
        Ok(())
    }
}

/// Handler endpoints
#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub pagerduty_routing_key: Option<String>,
    pub email_recipients: Vec<String>,
    /// Register the [`LogHandler`]
    pub log: bool,
}

impl NotifyConfig {
    /// Read handler settings from the environment
    /// CONMON_WEBHOOK_URL=https://hooks.example.com/alerts
    /// CONMON_SLACK_WEBHOOK_URL=https://hooks.slack.com/services/...
    /// CONMON_PAGERDUTY_ROUTING_KEY=...
    /// CONMON_ALERT_EMAILS=oncall@example.com,security@example.com
    /// CONMON_LOG_ALERTS=true
    pub fn from_env() -> Self {
        let non_empty = |var: &str| std::env::var(var).ok().filter(|v| !v.trim().is_empty());

        Self {
            webhook_url: non_empty("CONMON_WEBHOOK_URL"),
            slack_webhook_url: non_empty("CONMON_SLACK_WEBHOOK_URL"),
            pagerduty_routing_key: non_empty("CONMON_PAGERDUTY_ROUTING_KEY"),
            email_recipients: non_empty("CONMON_ALERT_EMAILS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            log: std::env::var("CONMON_LOG_ALERTS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }

    /// Register every configured handler. Returns how many were added.
    pub fn register(&self, registry: &HandlerRegistry) -> usize {
        let mut added = 0;

        if self.log {
            registry.register("log", std::sync::Arc::new(LogHandler));
            added += 1;
        }
        if let Some(url) = &self.webhook_url {
            registry.register("webhook", std::sync::Arc::new(WebhookHandler::new(url)));
            added += 1;
        }
        if let Some(url) = &self.slack_webhook_url {
            registry.register("slack", std::sync::Arc::new(SlackHandler::new(url)));
            added += 1;
        }
        if let Some(key) = &self.pagerduty_routing_key {
            registry.register("pagerduty", std::sync::Arc::new(PagerDutyHandler::new(key)));
            added += 1;
        }

        if !self.email_recipients.is_empty() {
            registry.register(
                "email",
                std::sync::Arc::new(EmailHandler::new(self.email_recipients.iter().cloned())),
            );
            added += 1;
        }

        tracing::info!(handlers = ?registry.names(), "Alert handlers registered");
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::model::Violation;

    fn make_alert(severity: Severity) -> Alert {
        let mut alert = Alert::new(severity, "Validation failed for ksi", "score 40.00", "CSO-001")
            .with_violations(vec![Violation::new(
                Severity::High,
                "KSI-IAM-01 is non-compliant",
                "KSI-IAM-01",
                "Implement required KSI controls",
            )]);
        alert.id = "ALERT-1".to_string();
        alert
    }

    #[tokio::test]
    async fn test_log_handler() {
        // Log delivery should always succeed
        let result = LogHandler.handle(&make_alert(Severity::High)).await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_slack_payload() {
        let payload = SlackHandler::payload(&make_alert(Severity::Critical));

        assert_eq!(payload["text"], "*critical Alert*: Validation failed for ksi");
        assert_eq!(payload["attachments"][0]["color"], "#FF0000");
        assert_eq!(payload["attachments"][0]["fields"][0]["value"], "CSO-001");
    }

    #[test]
    fn test_pagerduty_payload_and_filter() {
        let handler = PagerDutyHandler::new("routing-123");
        let alert = make_alert(Severity::Critical);
        let payload = handler.payload(&alert);

        assert_eq!(payload["routing_key"], "routing-123");
        assert_eq!(payload["dedup_key"], "ALERT-1");
        assert_eq!(payload["payload"]["severity"], "critical");
        assert_eq!(
            payload["payload"]["custom_details"]["violations"][0]["resource"],
            "KSI-IAM-01"
        );

        assert!(PagerDutyHandler::should_page(&alert));
        assert!(!PagerDutyHandler::should_page(&make_alert(Severity::High)));
    }

    #[tokio::test]
    async fn test_pagerduty_skips_non_critical() {
        // Unroutable endpoint: would fail if a request were attempted
        let handler = PagerDutyHandler::new("key").with_events_url("http://127.0.0.1:1/enqueue");
        assert!(handler.handle(&make_alert(Severity::Medium)).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_unreachable_reports_error() {
        let handler = WebhookHandler::new("http://127.0.0.1:1/alerts");
        let result = handler.handle(&make_alert(Severity::High)).await;
        assert!(matches!(result, Err(HandlerError::Http(_))));
    }

    #[tokio::test]
    async fn test_email_handler() {
        let alert = make_alert(Severity::High);
        assert_eq!(EmailHandler::subject(&alert), "[HIGH] Validation failed for ksi");

        let handler = EmailHandler::new(["oncall@example.com"]);
        assert!(handler.handle(&alert).await.is_ok());

        let unconfigured = EmailHandler::default();
        assert!(matches!(
            unconfigured.handle(&alert).await,
            Err(HandlerError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_notify_config_register() {
        let registry = HandlerRegistry::new();
        let config = NotifyConfig {
            webhook_url: Some("http://localhost:9000/hook".to_string()),
            pagerduty_routing_key: Some("key".to_string()),
            email_recipients: vec!["oncall@example.com".to_string()],
            log: true,
            ..Default::default()
        };

        assert_eq!(config.register(&registry), 4);
        assert_eq!(
            registry.names(),
            vec![
                "email".to_string(),
                "log".to_string(),
                "pagerduty".to_string(),
                "webhook".to_string()
            ]
        );
    }
}
