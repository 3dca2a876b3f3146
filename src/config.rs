//! Monitor configuration

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the monitor does with the aggregator's repetition signal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoisePolicy {
    /// Aggregator unused; every alert is enqueued as built
    #[default]
    Off,
    /// Alerts reaching the threshold are raised to critical
    Escalate,
    /// Alerts below the threshold are dropped before the queue
    Suppress,
}

impl FromStr for NoisePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(NoisePolicy::Off),
            "escalate" => Ok(NoisePolicy::Escalate),
            "suppress" => Ok(NoisePolicy::Suppress),
            other => Err(ConfigError::Invalid {
                field: "noise_policy",
                reason: format!("unknown policy '{}'", other),
            }),
        }
    }
}

impl fmt::Display for NoisePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoisePolicy::Off => "off",
            NoisePolicy::Escalate => "escalate",
            NoisePolicy::Suppress => "suppress",
        })
    }
}

/// Longest accepted interval or window (one year)
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Continuous monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Period of the validation loop
    #[serde(with = "duration_serde")]
    pub validation_interval: Duration,
    /// Period of the metric loop
    #[serde(with = "duration_serde")]
    pub metric_interval: Duration,
    /// Validation scores below this raise an alert
    pub alert_threshold: f64,
    /// Alert queue capacity
    pub queue_capacity: usize,
    #[serde(with = "duration_serde")]
    pub aggregator_window: Duration,
    pub aggregator_threshold: usize,
    pub noise_policy: NoisePolicy,
    /// Upper bound on concurrently running checks across both loops
    pub max_in_flight_checks: usize,
    /// Validators allowed to run; `None` runs all registered validators
    #[serde(default)]
    pub enabled_checks: Option<Vec<String>>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            validation_interval: Duration::from_secs(5 * 60),
            metric_interval: Duration::from_secs(60),
            alert_threshold: 95.0,
            queue_capacity: crate::alerts::queue::DEFAULT_QUEUE_CAPACITY,
            aggregator_window: Duration::from_secs(5 * 60),
            aggregator_threshold: 3,
            noise_policy: NoisePolicy::Off,
            max_in_flight_checks: num_cpus::get() * 4,
            enabled_checks: None,
        }
    }
}

impl MonitorConfig {
    /// Create config from environment variables
    /// CONMON_VALIDATION_INTERVAL_SECS=300
    /// CONMON_METRIC_INTERVAL_SECS=60
    /// CONMON_ALERT_THRESHOLD=95
    /// CONMON_QUEUE_CAPACITY=1000
    /// CONMON_AGGREGATOR_WINDOW_SECS=300
    /// CONMON_AGGREGATOR_THRESHOLD=3
    /// CONMON_NOISE_POLICY=off|escalate|suppress
    /// CONMON_MAX_IN_FLIGHT=32
    /// CONMON_ENABLED_CHECKS=ksi,vulnerability
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                Some(v) => parse_value::<u64>(key, &v).map(Duration::from_secs),
                None => Ok(default),
            }
        };

        let config = Self {
            validation_interval: secs(
                "CONMON_VALIDATION_INTERVAL_SECS",
                defaults.validation_interval,
            )?,
            metric_interval: secs("CONMON_METRIC_INTERVAL_SECS", defaults.metric_interval)?,
            alert_threshold: match lookup("CONMON_ALERT_THRESHOLD") {
                Some(v) => parse_value("CONMON_ALERT_THRESHOLD", &v)?,
                None => defaults.alert_threshold,
            },
            queue_capacity: match lookup("CONMON_QUEUE_CAPACITY") {
                Some(v) => parse_value("CONMON_QUEUE_CAPACITY", &v)?,
                None => defaults.queue_capacity,
            },
            aggregator_window: secs(
                "CONMON_AGGREGATOR_WINDOW_SECS",
                defaults.aggregator_window,
            )?,
            aggregator_threshold: match lookup("CONMON_AGGREGATOR_THRESHOLD") {
                Some(v) => parse_value("CONMON_AGGREGATOR_THRESHOLD", &v)?,
                None => defaults.aggregator_threshold,
            },
            noise_policy: match lookup("CONMON_NOISE_POLICY") {
                Some(v) => v.parse()?,
                None => defaults.noise_policy,
            },
            max_in_flight_checks: match lookup("CONMON_MAX_IN_FLIGHT") {
                Some(v) => parse_value("CONMON_MAX_IN_FLIGHT", &v)?,
                None => defaults.max_in_flight_checks,
            },
            enabled_checks: lookup("CONMON_ENABLED_CHECKS").map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            }),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_validation_interval(mut self, interval: Duration) -> Self {
        self.validation_interval = interval;
        self
    }

    pub fn with_metric_interval(mut self, interval: Duration) -> Self {
        self.metric_interval = interval;
        self
    }

    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_aggregation(mut self, window: Duration, threshold: usize, policy: NoisePolicy) -> Self {
        self.aggregator_window = window;
        self.aggregator_threshold = threshold;
        self.noise_policy = policy;
        self
    }

    pub fn with_max_in_flight_checks(mut self, max: usize) -> Self {
        self.max_in_flight_checks = max;
        self
    }

    pub fn with_enabled_checks<I, S>(mut self, checks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_checks = Some(checks.into_iter().map(Into::into).collect());
        self
    }

    /// Whether the validator registered as `name` may run
    pub fn is_check_enabled(&self, name: &str) -> bool {
        match &self.enabled_checks {
            Some(enabled) => enabled.iter().any(|c| c == name),
            None => true,
        }
    }

    /// Reject zero or over-long durations, zero counts, and thresholds
    /// outside 0..=100
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive_duration = |field: &'static str, d: Duration| {
            if d.is_zero() {
                Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                })
            } else if d > MAX_INTERVAL {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("{:?} exceeds the maximum of {:?}", d, MAX_INTERVAL),
                })
            } else {
                Ok(())
            }
        };
        let positive_count = |field: &'static str, n: usize| {
            if n == 0 {
                Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };

        positive_duration("validation_interval", self.validation_interval)?;
        positive_duration("metric_interval", self.metric_interval)?;
        positive_duration("aggregator_window", self.aggregator_window)?;
        positive_count("queue_capacity", self.queue_capacity)?;
        positive_count("aggregator_threshold", self.aggregator_threshold)?;
        positive_count("max_in_flight_checks", self.max_in_flight_checks)?;

        if !(0.0..=100.0).contains(&self.alert_threshold) {
            return Err(ConfigError::Invalid {
                field: "alert_threshold",
                reason: format!("{} is outside 0..=100", self.alert_threshold),
            });
        }

        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Parse {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Cannot parse {key}={value}")]
    Parse { key: String, value: String },
}

/// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct DurationHelper {
        secs: u64,
        #[serde(default)]
        nanos: u32,
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        DurationHelper {
            secs: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let helper = DurationHelper::deserialize(deserializer)?;
        Ok(Duration::new(helper.secs, helper.nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.validation_interval, Duration::from_secs(300));
        assert_eq!(config.queue_capacity, 1000);
        assert!(config.is_check_enabled("anything"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = MonitorConfig::from_lookup(lookup(&[
            ("CONMON_VALIDATION_INTERVAL_SECS", "30"),
            ("CONMON_ALERT_THRESHOLD", "80.5"),
            ("CONMON_NOISE_POLICY", "Escalate"),
            ("CONMON_ENABLED_CHECKS", "ksi, access,"),
        ]))
        .unwrap();

        assert_eq!(config.validation_interval, Duration::from_secs(30));
        assert_eq!(config.metric_interval, Duration::from_secs(60));
        assert_eq!(config.alert_threshold, 80.5);
        assert_eq!(config.noise_policy, NoisePolicy::Escalate);
        assert!(config.is_check_enabled("ksi"));
        assert!(config.is_check_enabled("access"));
        assert!(!config.is_check_enabled("vulnerability"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert!(matches!(
            MonitorConfig::from_lookup(lookup(&[("CONMON_QUEUE_CAPACITY", "lots")])),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            MonitorConfig::from_lookup(lookup(&[("CONMON_QUEUE_CAPACITY", "0")])),
            Err(ConfigError::Invalid { field: "queue_capacity", .. })
        ));
        assert!(MonitorConfig::from_lookup(lookup(&[("CONMON_NOISE_POLICY", "loud")])).is_err());
    }

    #[test]
    fn test_oversized_intervals_rejected() {
        assert!(matches!(
            MonitorConfig::from_lookup(lookup(&[(
                "CONMON_VALIDATION_INTERVAL_SECS",
                "18446744073709551615"
            )])),
            Err(ConfigError::Invalid { field: "validation_interval", .. })
        ));

        let config = MonitorConfig::default().with_metric_interval(Duration::from_secs(u64::MAX));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "metric_interval", .. })
        ));

        let config = MonitorConfig::default().with_validation_interval(MAX_INTERVAL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_range() {
        let config = MonitorConfig::default().with_alert_threshold(120.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "alert_threshold", .. })
        ));
    }

    #[test]
    fn test_serde_roundtrip_keeps_durations() {
        let config = MonitorConfig::default().with_metric_interval(Duration::from_millis(1500));
        let json = serde_json::to_string(&config).unwrap();
        let back: MonitorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metric_interval, Duration::from_millis(1500));
    }
}
