// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retention for grouped, time-stamped resources such as volume snapshots.
//!
//! [`RetentionSelector`] decides what survives a multi-tier [`RetentionPolicy`]
//! and [`PruneExecutor`] deletes the rest through the [`Deletable`] collaborator.
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use snapshot_retention::{RetentionPolicy, RetentionSelector};
//!
//! let now = Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap();
//! let snapshots: Vec<_> = (0..48).map(|h| ("vol-1", now - Duration::hours(h))).collect();
//!
//! let policy = RetentionPolicy { hourly: Some(6), ..Default::default() };
//! let selection = RetentionSelector::new(policy).select(&snapshots, |s| s.1, |s| s.0, now);
//! assert_eq!(selection.kept().len(), 7);
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod policy;
pub mod prune;
pub mod selector;

use chrono::{DateTime, Utc};
use lifecycle_common::{ConfigError, ProviderContext};
use std::hash::Hash;

pub use config::PruneConfig;
pub use policy::{RetentionPolicy, Tier};
pub use prune::{Deletable, PruneEntry, PruneExecutor, PruneOutcome, PruneReport};
pub use selector::{select_older_than, RetentionSelector, Selection};

/// Validates `policy`, selects what to keep and deletes the rest.
///
/// An invalid policy is rejected before any delete call is made.
pub async fn prune_by_policy<T, FT, FG, K>(
    executor: &PruneExecutor,
    items: &[T],
    time_of: FT,
    group_of: FG,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<PruneReport, ConfigError>
where
    T: Deletable,
    FT: Fn(&T) -> DateTime<Utc>,
    FG: Fn(&T) -> K,
    K: Eq + Hash,
{
    policy.validate()?;
    let selection = RetentionSelector::new(policy).select(items, &time_of, group_of, now);
    tracing::debug!(
        "Keeping {} of {} item(s)",
        selection.kept().len(),
        items.len()
    );
    Ok(executor.execute(items, time_of, &selection).await)
}

/// Prunes with the tier counts, delete pause and dry-run flag of `config`, e.g.
/// as loaded by [`PruneConfig::from_env`].
pub async fn prune_with_config<T, FT, FG, K>(
    context: ProviderContext,
    config: &PruneConfig,
    items: &[T],
    time_of: FT,
    group_of: FG,
    now: DateTime<Utc>,
) -> Result<PruneReport, ConfigError>
where
    T: Deletable,
    FT: Fn(&T) -> DateTime<Utc>,
    FG: Fn(&T) -> K,
    K: Eq + Hash,
{
    config.validate()?;
    let executor = PruneExecutor::new(context, config);
    prune_by_policy(&executor, items, time_of, group_of, config.policy, now).await
}

/// Deletes everything older than `max_age`.
pub async fn clean_older_than<T, FT>(
    executor: &PruneExecutor,
    items: &[T],
    time_of: FT,
    max_age: chrono::Duration,
    now: DateTime<Utc>,
) -> PruneReport
where
    T: Deletable,
    FT: Fn(&T) -> DateTime<Utc>,
{
    let selection = select_older_than(items, &time_of, max_age, now);
    executor.execute(items, time_of, &selection).await
}
