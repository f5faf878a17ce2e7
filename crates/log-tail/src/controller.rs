// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Orchestrates one tail run: discovery, worker pool, rate limiter refill and
//! the drain loop that writes merged output.

use std::io::Write;
use std::sync::Arc;

use lifecycle_common::ProviderContext;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{TailConfig, TailRequest};
use crate::discovery::{discover_sources, SourceLister};
use crate::errors::TailError;
use crate::merge_queue::MergeQueue;
use crate::rate_limiter::RateLimiter;
use crate::render::EventRenderer;
use crate::work::{BacklogSignal, FetchQuery, WorkItem, WorkQueue};
use crate::worker::{FetchWorker, LogFetcher, SourceFailure, WorkerShared, WorkerStats};

/// What a finished tail run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailSummary {
    /// Sources matched by the group filter, in listing order
    pub sources: Vec<String>,
    pub lines_written: usize,
    pub events_fetched: u64,
    pub pages_fetched: u64,
    /// Sources dropped after their fetch failed for good
    pub failures: Vec<SourceFailure>,
    /// The run ended because the cancellation token fired
    pub stopped_by_cancel: bool,
}

pub struct TailController<L, F> {
    context: ProviderContext,
    config: TailConfig,
    lister: Arc<L>,
    fetcher: Arc<F>,
    cancel: CancellationToken,
}

impl<L, F> TailController<L, F>
where
    L: SourceLister + 'static,
    F: LogFetcher + 'static,
{
    #[must_use]
    pub fn new(context: ProviderContext, config: TailConfig, lister: Arc<L>, fetcher: Arc<F>) -> Self {
        Self {
            context,
            config,
            lister,
            fetcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the token that stops the run, e.g. one wired to Ctrl-C.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops a running [`TailController::run`] when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tails every source matching the request until cancelled or, for a
    /// request with an end time, until every source's backlog is written.
    ///
    /// Configuration and the group filter are validated before discovery.
    pub async fn run<W: Write>(
        &self,
        request: &TailRequest,
        out: &mut W,
    ) -> Result<TailSummary, TailError> {
        self.config.validate()?;
        request.validate()?;

        let sources = discover_sources(
            &self.context,
            self.lister.as_ref(),
            &request.group_filter,
            &self.config.list_retry,
        )
        .await?;
        let mut summary = TailSummary {
            sources: sources.clone(),
            ..Default::default()
        };
        if sources.is_empty() {
            warn!("No sources match '{}'", request.group_filter);
            return Ok(summary);
        }
        info!(
            "Tailing {} source(s) with {} worker(s)",
            sources.len(),
            self.config.workers
        );

        // stops workers and refill without touching the caller's token
        let workers_cancel = self.cancel.child_token();
        let queue = WorkQueue::new();
        let mut signals = Vec::with_capacity(sources.len());
        for source_group in sources {
            let (item, signal) = WorkItem::new(FetchQuery {
                source_group,
                start_time: request.start_time,
                end_time: request.end_time,
                filter_pattern: request.filter_pattern.clone(),
                next_token: None,
            });
            queue.push(item);
            signals.push(signal);
        }

        let limiter = RateLimiter::new(self.config.permits, self.config.refill_interval);
        let refill = limiter.spawn_refill(workers_cancel.clone());
        let merge_queue = Arc::new(MergeQueue::new());
        let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();
        let shared = WorkerShared {
            context: self.context.clone(),
            fetcher: Arc::clone(&self.fetcher),
            queue,
            limiter,
            merge_queue: Arc::clone(&merge_queue),
            retry_strategy: self.config.fetch_retry.clone(),
            failures: failures_tx,
            cancel: workers_cancel.clone(),
        };

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let worker = FetchWorker::new(id, shared.clone(), EventRenderer::new(request.format));
            workers.spawn(worker.run());
        }
        drop(shared);

        let drained = self.drain_loop(request, &mut signals, &merge_queue, out).await;

        workers_cancel.cancel();
        let stats = join_workers(&mut workers).await;
        if let Err(e) = refill.await {
            error!("Rate limiter refill task failed: {e}");
        }
        while let Ok(failure) = failures_rx.try_recv() {
            summary.failures.push(failure);
        }

        let (lines_written, stopped_by_cancel) = drained?;
        summary.lines_written = lines_written;
        summary.stopped_by_cancel = stopped_by_cancel;
        summary.events_fetched = stats.events_emitted;
        summary.pages_fetched = stats.pages_fetched;
        info!(
            "Tail finished: {} line(s) written, {} source failure(s)",
            summary.lines_written,
            summary.failures.len()
        );
        Ok(summary)
    }

    /// Returns the number of lines written and whether cancellation ended it.
    async fn drain_loop<W: Write>(
        &self,
        request: &TailRequest,
        signals: &mut [BacklogSignal],
        merge_queue: &MergeQueue,
        out: &mut W,
    ) -> Result<(usize, bool), TailError> {
        let bounded = request.end_time.is_some();
        let mut backlog_done = false;
        let mut written = 0;

        loop {
            if !backlog_done {
                backlog_done = if request.sorted {
                    if !self.wait_all(signals).await {
                        return Ok((written, true));
                    }
                    true
                } else {
                    signals.iter().all(BacklogSignal::is_done)
                };
                if backlog_done {
                    debug!("Initial backlog of every source fetched");
                }
            } else if request.sorted && !self.pause(self.config.sort_settle).await {
                return Ok((written, true));
            }

            if self.cancel.is_cancelled() {
                return Ok((written, true));
            }
            let drained = write_records(merge_queue, out)?;
            written += drained;
            if drained > 0 {
                debug!("Drained {drained} line(s)");
            }

            if backlog_done && bounded {
                return Ok((written, false));
            }
            if !request.sorted && drained == 0 && !self.pause(self.config.poll_interval).await {
                return Ok((written, true));
            }
        }
    }

    /// Waits on every backlog signal; `false` if cancelled first.
    async fn wait_all(&self, signals: &mut [BacklogSignal]) -> bool {
        for signal in signals.iter_mut() {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                () = signal.wait() => {}
            }
        }
        true
    }

    /// Sleeps unless cancelled first, in which case it returns `false`.
    async fn pause(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

fn write_records<W: Write>(merge_queue: &MergeQueue, out: &mut W) -> Result<usize, TailError> {
    let records = merge_queue.drain();
    for record in &records {
        writeln!(out, "{}", record.line)?;
    }
    out.flush()?;
    Ok(records.len())
}

async fn join_workers(workers: &mut JoinSet<WorkerStats>) -> WorkerStats {
    let mut total = WorkerStats::default();
    while let Some(result) = workers.join_next().await {
        match result {
            Ok(stats) => {
                total.pages_fetched += stats.pages_fetched;
                total.events_emitted += stats.events_emitted;
            }
            Err(e) => error!("Fetch worker failed: {e}"),
        }
    }
    total
}
