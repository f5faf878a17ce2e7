// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::future::Future;
use std::time::Duration;

use crate::errors::{ConfigError, ProviderError};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a collaborator needs to reach the provider.
///
/// Built once at startup and passed by reference into every `delete`, `list`,
/// `fetch` and `put_events` call instead of living in a process-wide client cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderContext {
    /// Provider region (e.g., "eu-west-1")
    pub region: String,
    /// Upper bound for a single provider request
    pub request_timeout: Duration,
}

impl Default for ProviderContext {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ProviderContext {
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Default::default()
        }
    }

    /// Create the context from `AWS_REGION`, `AWS_DEFAULT_REGION` and
    /// `LIFECYCLE_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let region = env::var("AWS_REGION")
            .or_else(|_| env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| DEFAULT_REGION.to_string());
        let request_timeout = match env::var("LIFECYCLE_REQUEST_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                    key: "LIFECYCLE_REQUEST_TIMEOUT_SECS".to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => DEFAULT_REQUEST_TIMEOUT,
        };

        let context = Self {
            region,
            request_timeout,
        };
        context.validate()?;
        Ok(context)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "AWS_REGION".to_string(),
                value: self.region.clone(),
                reason: "region cannot be empty".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "LIFECYCLE_REQUEST_TIMEOUT_SECS".to_string(),
                value: "0".to_string(),
                reason: "timeout must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Awaits one provider request for at most `request_timeout`. A request
    /// that runs out of time fails as [`ProviderError::Transient`].
    pub async fn bounded<T, Fut>(&self, operation: &str, request: Fut) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Transient(format!(
                "{operation} timed out after {}ms",
                self.request_timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        env::remove_var("AWS_REGION");
        env::remove_var("AWS_DEFAULT_REGION");
        env::remove_var("LIFECYCLE_REQUEST_TIMEOUT_SECS");
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let context = ProviderContext::from_env().expect("defaults are valid");
        assert_eq!(context, ProviderContext::default());
    }

    #[test]
    #[serial]
    fn test_region_precedence() {
        clear_env();
        env::set_var("AWS_DEFAULT_REGION", "eu-north-1");
        assert_eq!(
            ProviderContext::from_env().expect("valid").region,
            "eu-north-1"
        );

        env::set_var("AWS_REGION", "eu-west-1");
        assert_eq!(
            ProviderContext::from_env().expect("valid").region,
            "eu-west-1"
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_timeout_is_rejected() {
        clear_env();
        env::set_var("LIFECYCLE_REQUEST_TIMEOUT_SECS", "soon");
        assert!(matches!(
            ProviderContext::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));

        env::set_var("LIFECYCLE_REQUEST_TIMEOUT_SECS", "0");
        assert!(ProviderContext::from_env().is_err());
        clear_env();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_request_times_out_as_transient() {
        let context = ProviderContext {
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = context
            .bounded("fetch app", std::future::pending())
            .await;

        assert_eq!(
            result,
            Err(ProviderError::Transient(
                "fetch app timed out after 5000ms".to_string()
            ))
        );
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(
            context
                .bounded("fetch app", async { Ok::<_, ProviderError>(7) })
                .await,
            Ok(7)
        );
    }

    #[test]
    fn test_empty_region_is_invalid() {
        let context = ProviderContext::new("  ");
        assert!(context.validate().is_err());
    }
}
