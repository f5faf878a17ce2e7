// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fetch workers: pull a source's work item, page through its events under the
//! rate limiter, hand rendered lines to the merge queue and requeue the item.

use std::sync::Arc;

use async_trait::async_trait;
use lifecycle_common::{retry_transient, ProviderContext, ProviderError, RetryStrategy};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::merge_queue::MergeQueue;
use crate::rate_limiter::RateLimiter;
use crate::render::EventRenderer;
use crate::work::{FetchQuery, WorkItem, WorkQueue};

/// One event as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedEvent {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub message: String,
    pub stream: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPage {
    pub events: Vec<FetchedEvent>,
    pub next_token: Option<String>,
}

/// Filtered, paginated event query against one source group.
#[async_trait]
pub trait LogFetcher: Send + Sync {
    async fn fetch(
        &self,
        context: &ProviderContext,
        query: &FetchQuery,
    ) -> Result<FetchPage, ProviderError>;
}

/// A source that was dropped after its fetch failed for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_group: String,
    pub reason: String,
}

#[derive(Debug)]
pub enum WorkerState {
    PullWork,
    AcquirePermit(WorkItem),
    FetchPage(WorkItem),
    EmitEvents(WorkItem, FetchPage),
    AdvanceCursor(WorkItem),
    Requeue(WorkItem),
    Stopped,
}

impl WorkerState {
    fn name(&self) -> &'static str {
        match self {
            WorkerState::PullWork => "pull_work",
            WorkerState::AcquirePermit(_) => "acquire_permit",
            WorkerState::FetchPage(_) => "fetch_page",
            WorkerState::EmitEvents(..) => "emit_events",
            WorkerState::AdvanceCursor(_) => "advance_cursor",
            WorkerState::Requeue(_) => "requeue",
            WorkerState::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub pages_fetched: u64,
    pub events_emitted: u64,
}

/// Everything a worker shares with its siblings and the controller.
pub struct WorkerShared<F> {
    pub context: ProviderContext,
    pub fetcher: Arc<F>,
    pub queue: WorkQueue,
    pub limiter: RateLimiter,
    pub merge_queue: Arc<MergeQueue>,
    pub retry_strategy: RetryStrategy,
    pub failures: mpsc::UnboundedSender<SourceFailure>,
    pub cancel: CancellationToken,
}

impl<F> Clone for WorkerShared<F> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            fetcher: Arc::clone(&self.fetcher),
            queue: self.queue.clone(),
            limiter: self.limiter.clone(),
            merge_queue: Arc::clone(&self.merge_queue),
            retry_strategy: self.retry_strategy.clone(),
            failures: self.failures.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

pub struct FetchWorker<F> {
    id: usize,
    shared: WorkerShared<F>,
    renderer: EventRenderer,
    stats: WorkerStats,
    // highest timestamp seen for the item being drained
    last_timestamp: Option<i64>,
}

impl<F: LogFetcher> FetchWorker<F> {
    #[must_use]
    pub fn new(id: usize, shared: WorkerShared<F>, renderer: EventRenderer) -> Self {
        Self {
            id,
            shared,
            renderer,
            stats: WorkerStats::default(),
            last_timestamp: None,
        }
    }

    /// Runs the state machine until cancellation is observed.
    pub async fn run(mut self) -> WorkerStats {
        debug!("Fetch worker {} started", self.id);
        let mut state = WorkerState::PullWork;
        loop {
            state = match state {
                WorkerState::Stopped => break,
                state => self.step(state).await,
            };
            debug!("Fetch worker {} -> {}", self.id, state.name());
        }
        debug!(
            "Fetch worker {} stopped after {} page(s), {} event(s)",
            self.id, self.stats.pages_fetched, self.stats.events_emitted
        );
        self.stats
    }

    async fn step(&mut self, state: WorkerState) -> WorkerState {
        match state {
            WorkerState::PullWork => match self.shared.queue.pop(&self.shared.cancel).await {
                Some(item) => {
                    self.last_timestamp = None;
                    WorkerState::AcquirePermit(item)
                }
                None => WorkerState::Stopped,
            },
            WorkerState::AcquirePermit(item) => {
                if self.shared.limiter.acquire(&self.shared.cancel).await {
                    WorkerState::FetchPage(item)
                } else {
                    WorkerState::Stopped
                }
            }
            WorkerState::FetchPage(item) => self.fetch(item).await,
            WorkerState::EmitEvents(item, page) => self.emit(item, page),
            WorkerState::AdvanceCursor(mut item) => {
                item.advance_cursor(self.last_timestamp);
                item.signal_backlog_done();
                WorkerState::Requeue(item)
            }
            WorkerState::Requeue(item) => {
                if self.shared.queue.push(item) {
                    WorkerState::PullWork
                } else {
                    WorkerState::Stopped
                }
            }
            WorkerState::Stopped => WorkerState::Stopped,
        }
    }

    async fn fetch(&mut self, item: WorkItem) -> WorkerState {
        let operation = format!("fetch events from {}", item.source_group());
        let context = &self.shared.context;
        let fetcher = &self.shared.fetcher;
        let retried = retry_transient(&self.shared.retry_strategy, &operation, || {
            context.bounded(&operation, fetcher.fetch(context, &item.query))
        });
        // the page of a cancelled run is never emitted, so it is not awaited
        let result = tokio::select! {
            biased;
            () = self.shared.cancel.cancelled() => return WorkerState::Stopped,
            result = retried => result,
        };

        match result {
            Ok(page) => {
                self.stats.pages_fetched += 1;
                WorkerState::EmitEvents(item, page)
            }
            Err(e) => {
                warn!("Dropping source {}: {e}", item.source_group());
                item.signal_backlog_done();
                let _ = self.shared.failures.send(SourceFailure {
                    source_group: item.source_group().to_string(),
                    reason: e.source.to_string(),
                });
                WorkerState::PullWork
            }
        }
    }

    fn emit(&mut self, mut item: WorkItem, page: FetchPage) -> WorkerState {
        if self.shared.cancel.is_cancelled() {
            return WorkerState::Stopped;
        }

        let group = item.source_group().to_string();
        for event in &page.events {
            self.last_timestamp = Some(
                self.last_timestamp
                    .map_or(event.timestamp, |last| last.max(event.timestamp)),
            );
            for rendered in self.renderer.render(&group, event) {
                self.shared
                    .merge_queue
                    .push(rendered.timestamp, rendered.line);
            }
            self.stats.events_emitted += 1;
        }

        match page.next_token {
            Some(token) => {
                item.query.next_token = Some(token);
                WorkerState::AcquirePermit(item)
            }
            None => WorkerState::AdvanceCursor(item),
        }
    }
}
