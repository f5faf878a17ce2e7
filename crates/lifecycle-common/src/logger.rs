// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing setup shared by every lifecycle command.
//!
//! Log lines look like:
//!
//! ```text
//! LIFECYCLE | INFO | prune{group=vol-1}: Deleting snap-0a1b || 2024-03-01 10:00:00
//! LIFECYCLE | WARN | tail_worker{worker=3}: fetch /app/web failed (attempt 1/5), retrying in 2000ms
//! ```
//!
//! The level comes from `LIFECYCLE_LOG_LEVEL` (default `info`). Noisy transport
//! crates are silenced the same way regardless of the chosen level.

use std::env;
use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::errors::ConfigError;

const LOG_PREFIX: &str = "LIFECYCLE";
const VALID_LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Event formatter that prefixes every line with `LIFECYCLE | LEVEL |` and the
/// active span hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Logging configuration read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (e.g., trace, debug, info, warn, error, off)
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("LIFECYCLE_LOG_LEVEL")
            .map(|val| val.trim().to_lowercase())
            .unwrap_or_else(|_| "info".to_string());
        let config = Self { log_level };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "LIFECYCLE_LOG_LEVEL".to_string(),
                value: self.log_level.clone(),
                reason: "must be one of: trace, debug, info, warn, error, off".to_string(),
            });
        }
        Ok(())
    }

    /// Filter directives: the chosen level for every target.
    #[must_use]
    pub fn filter_directives(&self) -> String {
        self.log_level.clone()
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let filter = EnvFilter::try_new(config.filter_directives())
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing::debug!("Logging subsystem enabled");
    Ok(())
}
