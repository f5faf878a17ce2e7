// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor that owns the line queue and the stream's sequence token.
//!
//! Producers only hold a cheap [`ShipperHandle`]; batching, uploads and token
//! bookkeeping all happen on the service task.

use std::sync::Arc;

use chrono::Utc;
use lifecycle_common::{retry_transient, ProviderContext, RetryError};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::ShipperConfig;
use crate::shipper::batcher::LineBatcher;
use crate::shipper::{LogSink, ShippedEvent};

#[derive(Debug)]
pub enum ShipperCommand {
    Line(String),
    /// Flush now and report how many events were sent
    Flush(oneshot::Sender<usize>),
}

#[derive(Clone, Debug)]
pub struct ShipperHandle {
    tx: mpsc::UnboundedSender<ShipperCommand>,
}

impl ShipperHandle {
    pub fn send_line(
        &self,
        line: impl Into<String>,
    ) -> Result<(), mpsc::error::SendError<ShipperCommand>> {
        self.tx.send(ShipperCommand::Line(line.into()))
    }

    pub async fn flush(&self) -> Result<usize, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ShipperCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {e}"))?;
        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {e}"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShipperStats {
    pub events_sent: usize,
    pub batches_sent: usize,
    pub failed_batches: usize,
    /// Lines still queued when the service stopped
    pub unsent: usize,
}

pub struct ShipperService<S> {
    batcher: LineBatcher,
    rx: mpsc::UnboundedReceiver<ShipperCommand>,
    sink: Arc<S>,
    context: ProviderContext,
    group: String,
    stream: String,
    sequence_token: Option<String>,
    config: ShipperConfig,
    stats: ShipperStats,
}

impl<S: LogSink> ShipperService<S> {
    #[must_use]
    pub fn new(
        sink: Arc<S>,
        context: ProviderContext,
        group: impl Into<String>,
        stream: impl Into<String>,
        config: ShipperConfig,
    ) -> (Self, ShipperHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            batcher: LineBatcher::new(config.max_batch_events, config.max_batch_bytes),
            rx,
            sink,
            context,
            group: group.into(),
            stream: stream.into(),
            sequence_token: None,
            config,
            stats: ShipperStats::default(),
        };
        (service, ShipperHandle { tx })
    }

    /// Flushes every interval until `cancel` fires or all handles are dropped,
    /// then takes whatever is still queued and flushes once more.
    pub async fn run(mut self, cancel: CancellationToken) -> ShipperStats {
        debug!("Log shipper started for {}/{}", self.group, self.stream);
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }

        while let Ok(command) = self.rx.try_recv() {
            self.handle(command).await;
        }
        self.flush().await;

        self.stats.unsent = self.batcher.len();
        if self.stats.unsent > 0 {
            warn!(
                "Log shipper stopped with {} unsent line(s)",
                self.stats.unsent
            );
        }
        debug!(
            "Log shipper stopped after sending {} event(s)",
            self.stats.events_sent
        );
        self.stats
    }

    async fn handle(&mut self, command: ShipperCommand) {
        match command {
            ShipperCommand::Line(line) => self.batcher.push(&line),
            ShipperCommand::Flush(response_tx) => {
                let sent = self.flush().await;
                if response_tx.send(sent).is_err() {
                    error!("Failed to send flush response - receiver dropped");
                }
            }
        }
    }

    /// Sends batches until the queue is empty or a batch fails.
    async fn flush(&mut self) -> usize {
        let mut sent = 0;
        loop {
            let batch = self.batcher.next_batch(Utc::now().timestamp_millis());
            if batch.is_empty() {
                break;
            }
            match self.put(&batch).await {
                Ok(()) => {
                    sent += batch.len();
                    self.stats.events_sent += batch.len();
                    self.stats.batches_sent += 1;
                }
                Err(e) => {
                    error!("Failed to ship {} event(s), requeueing: {e}", batch.len());
                    self.stats.failed_batches += 1;
                    self.sequence_token = None;
                    self.batcher.requeue_front(batch);
                    break;
                }
            }
        }
        if sent > 0 {
            debug!("Shipped {sent} event(s) to {}", self.stream);
        }
        sent
    }

    async fn put(&mut self, events: &[ShippedEvent]) -> Result<(), RetryError> {
        let token = self.sequence_token.clone();
        let next_token = retry_transient(&self.config.put_retry, "put log events", || {
            self.context.bounded(
                "put log events",
                self.sink.put_events(
                    &self.context,
                    &self.group,
                    &self.stream,
                    events,
                    token.as_deref(),
                ),
            )
        })
        .await?;
        self.sequence_token = next_token;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shipper::tests::RecordingSink;
    use lifecycle_common::{ProviderError, RetryStrategy};
    use std::time::Duration;

    fn config() -> ShipperConfig {
        ShipperConfig {
            flush_interval: Duration::from_secs(2),
            put_retry: RetryStrategy::Immediate(2),
            ..Default::default()
        }
    }

    fn spawn(
        sink: &Arc<RecordingSink>,
        config: ShipperConfig,
        cancel: &CancellationToken,
    ) -> (ShipperHandle, tokio::task::JoinHandle<ShipperStats>) {
        let (service, handle) = ShipperService::new(
            Arc::clone(sink),
            ProviderContext::default(),
            "stack",
            "i-123|/var/log/app.log",
            config,
        );
        let cancel = cancel.clone();
        (handle, tokio::spawn(service.run(cancel)))
    }

    #[tokio::test]
    async fn test_flush_carries_sequence_token() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let (handle, task) = spawn(&sink, config(), &cancel);

        handle.send_line("one\n").expect("service running");
        assert_eq!(handle.flush().await, Ok(1));
        handle.send_line("two").expect("service running");
        handle.send_line("").expect("service running");
        assert_eq!(handle.flush().await, Ok(1));

        cancel.cancel();
        let stats = task.await.expect("service panicked");
        assert_eq!(stats.events_sent, 2);
        assert_eq!(stats.batches_sent, 2);

        let calls = sink.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].token, None);
        assert_eq!(calls[1].token.as_deref(), Some("token-1"));
        assert_eq!(calls[1].messages, vec!["two"]);
        assert_eq!(calls[1].stream, "i-123|/var/log/app.log");
    }

    #[tokio::test]
    async fn test_failed_batch_is_requeued_and_token_cleared() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let (handle, task) = spawn(&sink, config(), &cancel);

        handle.send_line("a").expect("service running");
        assert_eq!(handle.flush().await, Ok(1));

        sink.fail_next(2, ProviderError::Transient("throttled".to_string()));
        handle.send_line("b").expect("service running");
        handle.send_line("c").expect("service running");
        assert_eq!(handle.flush().await, Ok(0));

        assert_eq!(handle.flush().await, Ok(2));
        cancel.cancel();
        let stats = task.await.expect("service panicked");
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.unsent, 0);

        let calls = sink.calls();
        let last = calls.last().expect("successful retry");
        assert_eq!(last.messages, vec!["b", "c"]);
        assert_eq!(last.token, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_and_final_flush() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let (handle, task) = spawn(&sink, config(), &cancel);

        handle.send_line("tick").expect("service running");
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(sink.calls().len(), 1);

        handle.send_line("last words").expect("service running");
        cancel.cancel();
        let stats = task.await.expect("service panicked");
        assert_eq!(stats.events_sent, 2);
        assert_eq!(sink.calls()[1].messages, vec!["last words"]);
    }
}
