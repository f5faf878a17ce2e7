// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-source work items and the FIFO queue the fetch workers share.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

/// One filtered query against a single source group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchQuery {
    pub source_group: String,
    /// Inclusive lower bound in epoch milliseconds
    pub start_time: i64,
    /// Inclusive upper bound in epoch milliseconds, `None` for live tailing
    pub end_time: Option<i64>,
    pub filter_pattern: String,
    /// Continuation token of the page being drained
    pub next_token: Option<String>,
}

/// The cursor for one source, passed between workers through the [`WorkQueue`].
#[derive(Debug)]
pub struct WorkItem {
    pub query: FetchQuery,
    backlog_done: watch::Sender<bool>,
}

impl WorkItem {
    #[must_use]
    pub fn new(query: FetchQuery) -> (Self, BacklogSignal) {
        let (tx, rx) = watch::channel(false);
        let signal = BacklogSignal {
            source_group: query.source_group.clone(),
            rx,
        };
        (
            Self {
                query,
                backlog_done: tx,
            },
            signal,
        )
    }

    #[must_use]
    pub fn source_group(&self) -> &str {
        &self.query.source_group
    }

    /// Moves the cursor past `last_timestamp`. The cursor never moves back.
    pub fn advance_cursor(&mut self, last_timestamp: Option<i64>) {
        self.query.next_token = None;
        if let Some(last) = last_timestamp {
            self.query.start_time = self.query.start_time.max(last.saturating_add(1));
        }
    }

    /// Marks the initial backlog of this source as fetched. Idempotent.
    pub fn signal_backlog_done(&self) {
        self.backlog_done.send_if_modified(|done| {
            let changed = !*done;
            *done = true;
            changed
        });
    }
}

/// Controller side of a [`WorkItem`]'s backlog flag.
#[derive(Debug, Clone)]
pub struct BacklogSignal {
    source_group: String,
    rx: watch::Receiver<bool>,
}

impl BacklogSignal {
    #[must_use]
    pub fn source_group(&self) -> &str {
        &self.source_group
    }

    /// A signal whose work item was dropped counts as done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Waits until the backlog is done.
    pub async fn wait(&mut self) {
        // Err means the work item is gone, which cannot stall the controller
        let _ = self.rx.wait_for(|done| *done).await;
    }

    /// Waits at most `timeout`; returns whether the backlog is done.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return self.is_done();
        }
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

/// Unbounded FIFO of work items with a receiver shared by all workers.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Appends an item. The receiver lives as long as the queue, so this only
    /// fails once every clone has been dropped.
    pub fn push(&self, item: WorkItem) -> bool {
        self.tx.send(item).is_ok()
    }

    /// Next item in FIFO order, or `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<WorkItem> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            item = async { self.rx.lock().await.recv().await } => item,
        }
    }
}
