// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry strategies for single provider calls.
//!
//! A [`RetryStrategy`] is a value describing how many attempts a call gets and how
//! long to wait between them. [`retry_transient`] applies it to one async call and
//! only retries [`ProviderError::Transient`] failures; permanent errors are
//! returned after the first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Retry right away, up to the given number of attempts.
    Immediate(u64),
    /// Number of attempts and fixed delay in milliseconds between them.
    LinearBackoff(u64, u64),
    /// Delay before attempt `n + 1` is `base_ms * multiplier^(n - 1)`.
    ExponentialBackoff {
        attempts: u64,
        base_ms: u64,
        multiplier: u32,
    },
}

impl RetryStrategy {
    /// Deleting a single resource: 5 attempts, 1s base, tripling.
    #[must_use]
    pub fn delete_default() -> Self {
        RetryStrategy::ExponentialBackoff {
            attempts: 5,
            base_ms: 1_000,
            multiplier: 3,
        }
    }

    /// Fetching one page of log events: 5 attempts, 2s base, doubling.
    #[must_use]
    pub fn fetch_default() -> Self {
        RetryStrategy::ExponentialBackoff {
            attempts: 5,
            base_ms: 2_000,
            multiplier: 2,
        }
    }

    /// Listing and uploading: 5 attempts, 1s base, doubling.
    #[must_use]
    pub fn request_default() -> Self {
        RetryStrategy::ExponentialBackoff {
            attempts: 5,
            base_ms: 1_000,
            multiplier: 2,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u64 {
        let attempts = match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                *attempts
            }
            RetryStrategy::ExponentialBackoff { attempts, .. } => *attempts,
        };
        attempts.max(1)
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u64) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => Duration::from_millis(*delay_ms),
            RetryStrategy::ExponentialBackoff {
                base_ms,
                multiplier,
                ..
            } => {
                let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                let factor = u64::from(*multiplier).saturating_pow(exponent);
                Duration::from_millis(base_ms.saturating_mul(factor))
            }
        }
    }
}

/// A call that failed permanently or ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s): {source}")]
pub struct RetryError {
    pub operation: String,
    pub attempts: u64,
    #[source]
    pub source: ProviderError,
}

/// Runs `call` until it succeeds, fails permanently, or the strategy runs out of
/// attempts.
pub async fn retry_transient<T, F, Fut>(
    strategy: &RetryStrategy,
    operation: &str,
    mut call: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = strategy.max_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match call().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!("{operation} succeeded after {attempts} attempts");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempts < max_attempts => {
                let delay = strategy.delay_after(attempts);
                warn!(
                    "{operation} failed (attempt {attempts}/{max_attempts}), retrying in {}ms: {e}",
                    delay.as_millis()
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => {
                return Err(RetryError {
                    operation: operation.to_string(),
                    attempts,
                    source: e,
                });
            }
        }
    }
}
