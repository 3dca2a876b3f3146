//! Sliding-window repetition detector for alerts
//!
//! Alerts sharing an [`AggregationKey`] within the window count as one
//! recurring condition. The aggregator only reports whether the repetition
//! threshold has been reached; callers decide whether that means escalate or
//! stop suppressing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use parking_lot::Mutex;

use super::model::{Alert, Severity};

/// Identity of a recurring condition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub entity_id: String,
    pub severity: Severity,
    pub title: String,
}

impl AggregationKey {
    pub fn for_alert(alert: &Alert) -> Self {
        Self {
            entity_id: alert.entity_id.clone(),
            severity: alert.severity,
            title: alert.title.clone(),
        }
    }
}

pub struct AlertAggregator {
    window: chrono::Duration,
    threshold: usize,
    /// Timestamps of recent alerts per key
    entries: Mutex<FxHashMap<AggregationKey, Vec<DateTime<Utc>>>>,
}

impl AlertAggregator {
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window: chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100)),
            threshold: threshold.max(1),
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window.to_std().unwrap_or_default()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record `alert` and report whether its key reached the threshold
    pub fn add(&self, alert: &Alert) -> bool {
        self.add_at(alert, Utc::now())
    }

    /// [`add`](Self::add) with an explicit notion of "now"
    pub fn add_at(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        self.record_at(alert, now) >= self.threshold
    }

    /// Record `alert` and return how many same-key alerts are inside the
    /// window, this one included
    pub fn record_at(&self, alert: &Alert, now: DateTime<Utc>) -> usize {
        let key = AggregationKey::for_alert(alert);
        let cutoff = self.cutoff(now);

        let mut entries = self.entries.lock();
        let timestamps = entries.entry(key).or_default();
        timestamps.retain(|ts| *ts > cutoff);
        timestamps.push(alert.timestamp);
        timestamps.len()
    }

    /// Drop keys with nothing left inside the window. Returns the number of
    /// keys removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, timestamps| {
            timestamps.retain(|ts| *ts > cutoff);
            !timestamps.is_empty()
        });
        let removed = before - entries.len();

        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "Swept idle aggregation keys");
        }
        removed
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().len()
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn alert_at(entity: &str, title: &str, secs: i64) -> (Alert, DateTime<Utc>) {
        let ts = base() + chrono::Duration::seconds(secs);
        (
            Alert::new(Severity::High, title, "recurring", entity).with_timestamp(ts),
            ts,
        )
    }

    #[test]
    fn test_threshold_reached_within_window() {
        let aggregator = AlertAggregator::new(Duration::from_secs(60), 3);

        let results: Vec<bool> = [0, 10, 20]
            .iter()
            .map(|secs| {
                let (alert, now) = alert_at("CSO-001", "Validation failed for ksi", *secs);
                aggregator.add_at(&alert, now)
            })
            .collect();

        assert_eq!(results, vec![false, false, true]);
    }

    #[test]
    fn test_aged_out_counts_as_first() {
        let aggregator = AlertAggregator::new(Duration::from_secs(60), 3);

        let (first, t0) = alert_at("CSO-001", "t", 0);
        let (second, t70) = alert_at("CSO-001", "t", 70);

        assert!(!aggregator.add_at(&first, t0));
        assert!(!aggregator.add_at(&second, t70));
        assert_eq!(aggregator.record_at(&second, t70), 2);
    }

    #[test]
    fn test_threshold_one_always_fires() {
        let aggregator = AlertAggregator::new(Duration::from_secs(60), 1);
        let (alert, now) = alert_at("CSO-001", "t", 0);
        assert!(aggregator.add_at(&alert, now));
    }

    #[test]
    fn test_keys_are_independent() {
        let aggregator = AlertAggregator::new(Duration::from_secs(60), 2);

        let (a, t0) = alert_at("CSO-001", "t", 0);
        let (b, t1) = alert_at("CSO-002", "t", 1);
        let (c, t2) = alert_at("CSO-001", "other", 2);
        let low = a.clone().with_severity(Severity::Low);

        assert!(!aggregator.add_at(&a, t0));
        assert!(!aggregator.add_at(&b, t1));
        assert!(!aggregator.add_at(&c, t2));
        assert!(!aggregator.add_at(&low, t2));
        assert_eq!(aggregator.tracked_keys(), 4);

        // Same key as `a`, still inside the window
        assert!(aggregator.add_at(&a, t2));
    }

    #[test]
    fn test_sweep_removes_idle_keys() {
        let aggregator = AlertAggregator::new(Duration::from_secs(60), 3);

        let (old, t0) = alert_at("CSO-001", "t", 0);
        let (fresh, t50) = alert_at("CSO-002", "t", 50);
        aggregator.add_at(&old, t0);
        aggregator.add_at(&fresh, t50);

        assert_eq!(aggregator.sweep(base() + chrono::Duration::seconds(30)), 0);
        assert_eq!(aggregator.sweep(base() + chrono::Duration::seconds(80)), 1);
        assert_eq!(aggregator.tracked_keys(), 1);
        assert_eq!(aggregator.sweep(base() + chrono::Duration::seconds(200)), 1);
        assert_eq!(aggregator.tracked_keys(), 0);
    }

    #[test]
    fn test_zero_threshold_clamped() {
        let aggregator = AlertAggregator::new(Duration::from_secs(60), 0);
        assert_eq!(aggregator.threshold(), 1);
        assert_eq!(aggregator.window(), Duration::from_secs(60));
    }
}
