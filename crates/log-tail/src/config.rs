// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lifecycle_common::{ConfigError, RetryStrategy};

use crate::discovery::compile_filter;
use crate::render::OutputFormat;
use crate::time_expr::{end_time_millis, start_time_millis};

const DEFAULT_WORKERS: usize = 10;
const DEFAULT_PERMITS: usize = 5;
const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_millis(1100);
const DEFAULT_SORT_SETTLE: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

const MAX_BATCH_EVENTS: usize = 10_000;
const MAX_BATCH_BYTES: usize = 1_048_576;

/// Engine tuning for a tail run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailConfig {
    /// Number of fetch workers
    pub workers: usize,
    /// Rate limiter capacity, also the number of permits added per refill
    pub permits: usize,
    pub refill_interval: Duration,
    /// Pause between drains in sorted mode once every backlog is done
    pub sort_settle: Duration,
    /// Pause in live mode when a drain produced nothing
    pub poll_interval: Duration,
    pub list_retry: RetryStrategy,
    pub fetch_retry: RetryStrategy,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            permits: DEFAULT_PERMITS,
            refill_interval: DEFAULT_REFILL_INTERVAL,
            sort_settle: DEFAULT_SORT_SETTLE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            list_retry: RetryStrategy::request_default(),
            fetch_retry: RetryStrategy::fetch_default(),
        }
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(env_u64(key)?.map_or(default, Duration::from_millis))
}

fn env_count(key: &str, default: usize) -> Result<usize, ConfigError> {
    match env_u64(key)? {
        Some(value) => usize::try_from(value).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn must_be_positive(key: &str, value: u128) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

impl TailConfig {
    /// Create configuration from `LOG_TAIL_WORKERS`, `LOG_TAIL_PERMITS`,
    /// `LOG_TAIL_REFILL_MS`, `LOG_TAIL_SORT_SETTLE_MS` and `LOG_TAIL_POLL_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            workers: env_count("LOG_TAIL_WORKERS", DEFAULT_WORKERS)?,
            permits: env_count("LOG_TAIL_PERMITS", DEFAULT_PERMITS)?,
            refill_interval: env_millis("LOG_TAIL_REFILL_MS", DEFAULT_REFILL_INTERVAL)?,
            sort_settle: env_millis("LOG_TAIL_SORT_SETTLE_MS", DEFAULT_SORT_SETTLE)?,
            poll_interval: env_millis("LOG_TAIL_POLL_MS", DEFAULT_POLL_INTERVAL)?,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        must_be_positive("LOG_TAIL_WORKERS", self.workers as u128)?;
        must_be_positive("LOG_TAIL_PERMITS", self.permits as u128)?;
        must_be_positive("LOG_TAIL_REFILL_MS", self.refill_interval.as_millis())?;
        must_be_positive("LOG_TAIL_POLL_MS", self.poll_interval.as_millis())?;
        Ok(())
    }
}

/// What to tail and how to print it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRequest {
    /// Regular expression selecting source groups (unanchored)
    pub group_filter: String,
    /// Provider-side event filter, passed through untouched
    pub filter_pattern: String,
    /// Epoch milliseconds
    pub start_time: i64,
    /// Epoch milliseconds; `None` tails until cancelled
    pub end_time: Option<i64>,
    /// Hold output until every source's backlog is fetched, then keep sorting
    pub sorted: bool,
    pub format: OutputFormat,
}

impl TailRequest {
    /// Tails `group_filter` from a minute before `now`, unsorted, full format.
    #[must_use]
    pub fn new(group_filter: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            group_filter: group_filter.into(),
            filter_pattern: String::new(),
            start_time: now.timestamp_millis() - crate::time_expr::DEFAULT_LOOKBACK_SECS * 1000,
            end_time: None,
            sorted: false,
            format: OutputFormat::Full,
        }
    }

    /// Builds a request from the textual start and end expressions.
    pub fn from_expressions(
        group_filter: impl Into<String>,
        start: Option<&str>,
        end: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let request = Self {
            start_time: start_time_millis(start, now)?,
            end_time: end_time_millis(end, now)?,
            ..Self::new(group_filter, now)
        };
        request.validate()?;
        Ok(request)
    }

    #[must_use]
    pub fn with_filter_pattern(mut self, filter_pattern: impl Into<String>) -> Self {
        self.filter_pattern = filter_pattern.into();
        self
    }

    #[must_use]
    pub fn with_end_time(mut self, end_time: Option<i64>) -> Self {
        self.end_time = end_time;
        self
    }

    #[must_use]
    pub fn sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        compile_filter(&self.group_filter)?;
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(ConfigError::InvalidValue {
                    key: "end_time".to_string(),
                    value: end.to_string(),
                    reason: format!("ends before start time {}", self.start_time),
                });
            }
        }
        Ok(())
    }
}

/// Batching and flushing for the log shipper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipperConfig {
    pub flush_interval: Duration,
    pub max_batch_events: usize,
    pub max_batch_bytes: usize,
    pub put_retry: RetryStrategy,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_batch_events: MAX_BATCH_EVENTS,
            max_batch_bytes: MAX_BATCH_BYTES,
            put_retry: RetryStrategy::request_default(),
        }
    }
}

impl ShipperConfig {
    /// Create configuration from `LOG_SHIP_FLUSH_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            flush_interval: env_millis("LOG_SHIP_FLUSH_MS", DEFAULT_FLUSH_INTERVAL)?,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        must_be_positive("LOG_SHIP_FLUSH_MS", self.flush_interval.as_millis())?;
        must_be_positive("max_batch_events", self.max_batch_events as u128)?;
        if self.max_batch_bytes <= crate::shipper::EVENT_OVERHEAD_BYTES {
            return Err(ConfigError::InvalidValue {
                key: "max_batch_bytes".to_string(),
                value: self.max_batch_bytes.to_string(),
                reason: "too small to hold a single event".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serial_test::serial;

    const KEYS: [&str; 6] = [
        "LOG_TAIL_WORKERS",
        "LOG_TAIL_PERMITS",
        "LOG_TAIL_REFILL_MS",
        "LOG_TAIL_SORT_SETTLE_MS",
        "LOG_TAIL_POLL_MS",
        "LOG_SHIP_FLUSH_MS",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        assert_eq!(TailConfig::from_env(), Ok(TailConfig::default()));
        assert_eq!(ShipperConfig::from_env(), Ok(ShipperConfig::default()));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("LOG_TAIL_WORKERS", "4");
        env::set_var("LOG_TAIL_PERMITS", "2");
        env::set_var("LOG_TAIL_REFILL_MS", "500");
        env::set_var("LOG_TAIL_SORT_SETTLE_MS", "0");
        env::set_var("LOG_TAIL_POLL_MS", "250");
        env::set_var("LOG_SHIP_FLUSH_MS", "100");

        let config = TailConfig::from_env().expect("valid config");
        assert_eq!(config.workers, 4);
        assert_eq!(config.permits, 2);
        assert_eq!(config.refill_interval, Duration::from_millis(500));
        assert_eq!(config.sort_settle, Duration::ZERO);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(
            ShipperConfig::from_env().map(|c| c.flush_interval),
            Ok(Duration::from_millis(100))
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_values() {
        clear_env();
        env::set_var("LOG_TAIL_WORKERS", "many");
        assert!(matches!(
            TailConfig::from_env(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "LOG_TAIL_WORKERS"
        ));
        env::set_var("LOG_TAIL_WORKERS", "0");
        assert!(TailConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_request_from_expressions() {
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap();
        let request = TailRequest::from_expressions("app", Some("2h"), Some("1h ago"), now)
            .expect("valid request");
        assert_eq!(request.start_time, now.timestamp_millis() - 7_200_000);
        assert_eq!(request.end_time, Some(now.timestamp_millis() - 3_600_000));

        let request = TailRequest::from_expressions("app", None, None, now).expect("valid request");
        assert_eq!(request.start_time, now.timestamp_millis() - 60_000);
        assert_eq!(request.end_time, None);

        assert!(matches!(
            TailRequest::from_expressions("app", Some("1h"), Some("2h"), now),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            TailRequest::from_expressions("[", None, None, now),
            Err(ConfigError::InvalidFilter { .. })
        ));
        assert!(matches!(
            TailRequest::from_expressions("app", Some("later"), None, now),
            Err(ConfigError::InvalidTimeExpression(_))
        ));
    }
}
