// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;

use tracing::warn;

use crate::shipper::{ShippedEvent, EVENT_OVERHEAD_BYTES};

/// FIFO of pending lines cut into batches that fit one `put_events` call.
#[derive(Debug, Clone)]
pub struct LineBatcher {
    lines: VecDeque<String>,
    max_events: usize,
    max_bytes: usize,
}

impl LineBatcher {
    #[must_use]
    pub fn new(max_events: usize, max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max_events,
            max_bytes,
        }
    }

    /// Queues a line without its trailing whitespace. Empty lines are skipped.
    pub fn push(&mut self, line: &str) {
        let line = line.trim_end();
        if !line.is_empty() {
            self.lines.push_back(line.to_string());
        }
    }

    /// Puts the messages of a failed batch back at the front, in order.
    pub fn requeue_front(&mut self, events: Vec<ShippedEvent>) {
        for event in events.into_iter().rev() {
            self.lines.push_front(event.message);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Takes the next batch, stamping every event with `timestamp`.
    ///
    /// Each event costs its UTF-8 length plus [`EVENT_OVERHEAD_BYTES`]. A line
    /// too large for an empty batch is truncated rather than blocking the queue.
    pub fn next_batch(&mut self, timestamp: i64) -> Vec<ShippedEvent> {
        let mut events = Vec::new();
        let mut bytes = 0;

        while events.len() < self.max_events {
            let Some(line) = self.lines.front() else {
                break;
            };
            let cost = line.len() + EVENT_OVERHEAD_BYTES;
            if bytes + cost > self.max_bytes {
                if !events.is_empty() {
                    break;
                }
                let limit = self.max_bytes.saturating_sub(EVENT_OVERHEAD_BYTES);
                if limit == 0 {
                    warn!("Dropping line of {} bytes, batch limit too small", line.len());
                    self.lines.pop_front();
                    continue;
                }
                warn!(
                    "Line of {} bytes exceeds the batch limit, truncating to {limit}",
                    line.len()
                );
                if let Some(line) = self.lines.front_mut() {
                    truncate_at_char_boundary(line, limit);
                }
                continue;
            }
            bytes += cost;
            if let Some(message) = self.lines.pop_front() {
                events.push(ShippedEvent { timestamp, message });
            }
        }
        events
    }
}

fn truncate_at_char_boundary(line: &mut String, limit: usize) {
    let mut end = limit.min(line.len());
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    line.truncate(end);
}
