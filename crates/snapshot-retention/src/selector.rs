// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keep/delete selection over grouped, time-stamped items.
//!
//! Items are identified by their position in the input slice, so two items with
//! the same timestamp and group are still distinct.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::policy::{RetentionPolicy, Tier};

/// Result of a selection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    keep: BTreeSet<usize>,
    /// Indices not kept, newest first.
    delete: Vec<usize>,
}

impl Selection {
    #[must_use]
    pub fn is_kept(&self, index: usize) -> bool {
        self.keep.contains(&index)
    }

    #[must_use]
    pub fn kept(&self) -> &BTreeSet<usize> {
        &self.keep
    }

    #[must_use]
    pub fn to_delete(&self) -> &[usize] {
        &self.delete
    }

    #[must_use]
    pub fn nothing_to_delete(&self) -> bool {
        self.delete.is_empty()
    }

    pub fn kept_items<'a, T>(&'a self, items: &'a [T]) -> impl Iterator<Item = &'a T> + 'a {
        self.keep.iter().filter_map(move |&i| items.get(i))
    }

    pub fn deleted_items<'a, T>(&'a self, items: &'a [T]) -> impl Iterator<Item = &'a T> + 'a {
        self.delete.iter().filter_map(move |&i| items.get(i))
    }

    fn from_keep<T>(items: &[T], ascending: &[usize], keep: BTreeSet<usize>) -> Self {
        debug_assert_eq!(items.len(), ascending.len());
        let delete = ascending
            .iter()
            .rev()
            .copied()
            .filter(|i| !keep.contains(i))
            .collect();
        Selection { keep, delete }
    }
}

/// Indices of `items` sorted ascending by time; ties keep input order.
fn sorted_ascending<T, FT>(items: &[T], time_of: &FT) -> Vec<usize>
where
    FT: Fn(&T) -> DateTime<Utc>,
{
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by_key(|&i| time_of(&items[i]));
    order
}

/// Computes which items survive a [`RetentionPolicy`].
///
/// Every enabled tier walks the full ascending sequence on its own. Within a
/// group, an item whose bucket differs from the previous item's bucket is kept
/// when it is at or after the tier's cutoff. The result is the union over tiers.
#[derive(Debug, Clone, Copy)]
pub struct RetentionSelector {
    policy: RetentionPolicy,
}

impl RetentionSelector {
    #[must_use]
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn select<T, FT, FG, K>(
        &self,
        items: &[T],
        time_of: FT,
        group_of: FG,
        now: DateTime<Utc>,
    ) -> Selection
    where
        FT: Fn(&T) -> DateTime<Utc>,
        FG: Fn(&T) -> K,
        K: Eq + Hash,
    {
        let ascending = sorted_ascending(items, &time_of);
        let mut keep = BTreeSet::new();

        for (tier, count) in self.policy.enabled_tiers() {
            let before = keep.len();
            select_tier(
                &mut keep,
                items,
                &ascending,
                &time_of,
                &group_of,
                tier,
                tier.cutoff(count, now),
            );
            debug!(
                "Tier {} ({count} buckets) added {} item(s)",
                tier.name(),
                keep.len() - before
            );
        }

        Selection::from_keep(items, &ascending, keep)
    }
}

fn select_tier<T, FT, FG, K>(
    keep: &mut BTreeSet<usize>,
    items: &[T],
    ascending: &[usize],
    time_of: &FT,
    group_of: &FG,
    tier: Tier,
    cutoff: Option<DateTime<Utc>>,
) where
    FT: Fn(&T) -> DateTime<Utc>,
    FG: Fn(&T) -> K,
    K: Eq + Hash,
{
    // most recently seen bucket start per group
    let mut cursors: HashMap<K, DateTime<Utc>> = HashMap::new();

    for &index in ascending {
        let item = &items[index];
        let time = time_of(item);
        let bucket = tier.floor(time);
        let previous = cursors.insert(group_of(item), bucket);

        let new_bucket = previous != Some(bucket);
        let recent = cutoff.map_or(true, |cutoff| time >= cutoff);
        if new_bucket && recent {
            keep.insert(index);
        }
    }
}

/// Keeps everything at or after `now - max_age` and marks the rest for deletion.
pub fn select_older_than<T, FT>(
    items: &[T],
    time_of: FT,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Selection
where
    FT: Fn(&T) -> DateTime<Utc>,
{
    let ascending = sorted_ascending(items, &time_of);
    let threshold = now.checked_sub_signed(max_age);
    let keep = (0..items.len())
        .filter(|&i| threshold.map_or(true, |threshold| time_of(&items[i]) >= threshold))
        .collect();
    Selection::from_keep(items, &ascending, keep)
}
