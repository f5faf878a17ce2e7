// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use lifecycle_common::{ConfigError, RetryError};

/// Errors that stop a tail run before or while it produces output.
///
/// Failures of a single source are not errors here; they are collected as
/// [`crate::SourceFailure`]s in the run summary.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Source discovery failed: {0}")]
    Discovery(#[from] RetryError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle_common::ProviderError;

    #[test]
    fn test_error_display() {
        let err = TailError::from(ConfigError::InvalidFilter {
            pattern: "(".to_string(),
            reason: "unclosed group".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Invalid source filter '(': unclosed group"
        );

        let err = TailError::from(RetryError {
            operation: "list sources".to_string(),
            attempts: 5,
            source: ProviderError::Transient("throttled".to_string()),
        });
        assert_eq!(
            err.to_string(),
            "Source discovery failed: list sources failed after 5 attempt(s): Transient provider error: throttled"
        );
    }
}
