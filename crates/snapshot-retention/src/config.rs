// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use lifecycle_common::ConfigError;

use crate::policy::{RetentionPolicy, Tier};

const DEFAULT_DELETE_PAUSE: Duration = Duration::from_millis(300);

/// Configuration for a prune run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneConfig {
    /// Tier counts; defaults to [`RetentionPolicy::snapshot_defaults`]
    pub policy: RetentionPolicy,
    /// Pause after each successful delete to stay under provider rate limits
    pub delete_pause: Duration,
    /// Report what would be deleted without deleting
    pub dry_run: bool,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            policy: RetentionPolicy::snapshot_defaults(),
            delete_pause: DEFAULT_DELETE_PAUSE,
            dry_run: false,
        }
    }
}

fn tier_env_key(tier: Tier) -> String {
    format!("PRUNE_{}", tier.name().to_uppercase())
}

fn parse_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

impl PruneConfig {
    /// Create configuration from environment variables.
    ///
    /// `PRUNE_TEN_MINUTELY` .. `PRUNE_YEARLY` override single tiers (`none` or an
    /// empty value disables one), `PRUNE_DELETE_PAUSE_MS` and `PRUNE_DRY_RUN`
    /// control execution.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut policy = RetentionPolicy::snapshot_defaults();
        for tier in Tier::ALL {
            let key = tier_env_key(tier);
            if let Ok(raw) = env::var(&key) {
                let trimmed = raw.trim();
                let count = if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
                    None
                } else {
                    let value = parse_u64(&key, trimmed)?;
                    Some(u32::try_from(value).map_err(|e| ConfigError::InvalidValue {
                        key: key.clone(),
                        value: raw.clone(),
                        reason: e.to_string(),
                    })?)
                };
                policy = policy.with_count(tier, count);
            }
        }

        let delete_pause = match env::var("PRUNE_DELETE_PAUSE_MS") {
            Ok(raw) => Duration::from_millis(parse_u64("PRUNE_DELETE_PAUSE_MS", &raw)?),
            Err(_) => DEFAULT_DELETE_PAUSE,
        };
        let dry_run = env::var("PRUNE_DRY_RUN")
            .map(|val| matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let config = Self {
            policy,
            delete_pause,
            dry_run,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for tier in Tier::ALL {
            env::remove_var(tier_env_key(tier));
        }
        env::remove_var("PRUNE_DELETE_PAUSE_MS");
        env::remove_var("PRUNE_DRY_RUN");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(PruneConfig::default().validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        assert_eq!(PruneConfig::from_env(), Ok(PruneConfig::default()));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("PRUNE_HOURLY", "24");
        env::set_var("PRUNE_YEARLY", "none");
        env::set_var("PRUNE_DELETE_PAUSE_MS", "0");
        env::set_var("PRUNE_DRY_RUN", "TRUE");

        let config = PruneConfig::from_env().expect("valid config");
        assert_eq!(config.policy.hourly, Some(24));
        assert_eq!(config.policy.yearly, None);
        assert_eq!(config.policy.daily, Some(30));
        assert_eq!(config.delete_pause, Duration::ZERO);
        assert!(config.dry_run);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_values() {
        clear_env();
        env::set_var("PRUNE_DAILY", "-1");
        assert!(matches!(
            PruneConfig::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));
        clear_env();

        for tier in Tier::ALL {
            env::set_var(tier_env_key(tier), "0");
        }
        assert!(matches!(
            PruneConfig::from_env(),
            Err(ConfigError::InvalidPolicy(_))
        ));
        clear_env();
    }
}
