// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors returned by cloud provider collaborators (delete, list, fetch, put).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network or throttling failure; safe to retry locally.
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Any other error the provider reports as final (validation, conflicts).
    #[error("Request rejected by provider: {0}")]
    Rejected(String),
}

impl ProviderError {
    /// Only transient errors are worth another attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Errors detected while validating policies, filters and configuration.
///
/// These are always reported before any worker or deletion starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid retention policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid source filter '{pattern}': {reason}")]
    InvalidFilter { pattern: String, reason: String },

    #[error("Invalid time expression: {0}")]
    InvalidTimeExpression(String),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}
