// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Applies a [`Selection`] by deleting everything it did not keep.
//!
//! Each delete call gets its own retry budget. A failure is recorded against
//! that item only and the executor moves on to the next one.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lifecycle_common::{retry_transient, ProviderContext, ProviderError, RetryStrategy};
use tracing::{info, warn};

use crate::config::PruneConfig;
use crate::selector::Selection;

const TIME_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

/// A provider resource that can be removed.
#[async_trait]
pub trait Deletable: Send + Sync {
    /// Name shown in the prune report (e.g., snapshot id plus its Name tag).
    fn display_name(&self) -> String;

    async fn delete(&self, context: &ProviderContext) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    Kept,
    /// Deleted, or would have been deleted in a dry run.
    Deleted,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneEntry {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: PruneOutcome,
}

impl PruneEntry {
    fn lines(&self) -> Vec<String> {
        let when = self.timestamp.format(TIME_FORMAT);
        match &self.outcome {
            PruneOutcome::Kept => vec![format!("Skipping {} || {when}", self.name)],
            PruneOutcome::Deleted => vec![format!("Deleting {} || {when}", self.name)],
            PruneOutcome::Failed(reason) => vec![
                format!("Deleting {} || {when}", self.name),
                format!("Delete failed: {} || {reason}", self.name),
            ],
        }
    }
}

/// What a prune run did, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub dry_run: bool,
    pub entries: Vec<PruneEntry>,
}

impl PruneReport {
    fn count(&self, predicate: impl Fn(&PruneOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| predicate(&e.outcome)).count()
    }

    #[must_use]
    pub fn kept(&self) -> usize {
        self.count(|o| matches!(o, PruneOutcome::Kept))
    }

    #[must_use]
    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, PruneOutcome::Deleted))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PruneOutcome::Failed(_)))
    }

    #[must_use]
    pub fn nothing_to_delete(&self) -> bool {
        self.entries
            .iter()
            .all(|e| matches!(e.outcome, PruneOutcome::Kept))
    }

    #[must_use]
    pub fn summary(&self) -> String {
        if self.nothing_to_delete() {
            return "Nothing to delete".to_string();
        }
        let suffix = if self.dry_run { " (dry run)" } else { "" };
        format!(
            "Kept {}, deleted {}, failed {}{suffix}",
            self.kept(),
            self.deleted(),
            self.failed()
        )
    }

    /// One line per item plus the summary, or only the summary when nothing
    /// was up for deletion.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.nothing_to_delete() {
            for entry in &self.entries {
                lines.extend(entry.lines());
            }
        }
        lines.push(self.summary());
        lines
    }
}

impl fmt::Display for PruneReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// Deletes the complement of a selection through [`Deletable`].
#[derive(Debug, Clone)]
pub struct PruneExecutor {
    context: ProviderContext,
    retry_strategy: RetryStrategy,
    delete_pause: Duration,
    dry_run: bool,
}

impl PruneExecutor {
    #[must_use]
    pub fn new(context: ProviderContext, config: &PruneConfig) -> Self {
        Self {
            context,
            retry_strategy: RetryStrategy::delete_default(),
            delete_pause: config.delete_pause,
            dry_run: config.dry_run,
        }
    }

    #[must_use]
    pub fn with_retry_strategy(mut self, retry_strategy: RetryStrategy) -> Self {
        self.retry_strategy = retry_strategy;
        self
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub async fn execute<T, FT>(
        &self,
        items: &[T],
        time_of: FT,
        selection: &Selection,
    ) -> PruneReport
    where
        T: Deletable,
        FT: Fn(&T) -> DateTime<Utc>,
    {
        let mut report = PruneReport {
            dry_run: self.dry_run,
            entries: Vec::with_capacity(items.len()),
        };
        let quiet = selection.nothing_to_delete();

        for (index, item) in items.iter().enumerate() {
            let name = item.display_name();
            let timestamp = time_of(item);
            let when = timestamp.format(TIME_FORMAT).to_string();

            let outcome = if selection.is_kept(index) {
                if !quiet {
                    info!("Skipping {name} || {when}");
                }
                PruneOutcome::Kept
            } else {
                info!("Deleting {name} || {when}");
                let outcome = self.delete(item, &name).await;
                if let PruneOutcome::Failed(reason) = &outcome {
                    warn!("Delete failed: {name} || {reason}");
                }
                outcome
            };

            report.entries.push(PruneEntry {
                name,
                timestamp,
                outcome,
            });
        }

        info!("{}", report.summary());
        report
    }

    async fn delete<T: Deletable>(&self, item: &T, name: &str) -> PruneOutcome {
        if self.dry_run {
            return PruneOutcome::Deleted;
        }

        let operation = format!("delete {name}");
        let result = retry_transient(&self.retry_strategy, &operation, || {
            self.context.bounded(&operation, item.delete(&self.context))
        })
        .await;

        match result {
            Ok(()) => {
                if !self.delete_pause.is_zero() {
                    tokio::time::sleep(self.delete_pause).await;
                }
                PruneOutcome::Deleted
            }
            Err(e) => PruneOutcome::Failed(e.source.to_string()),
        }
    }
}
