// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Mutex, PoisonError};

/// A rendered line waiting for output, ordered by `(timestamp, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OutputRecord {
    pub timestamp: i64,
    pub sequence: u64,
    pub line: String,
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<Reverse<OutputRecord>>,
    next_sequence: u64,
}

/// Min-heap shared by all fetch workers of one controller.
///
/// Sequence numbers are assigned on push, so they are strictly increasing for
/// the lifetime of the queue and break timestamp ties in arrival order.
#[derive(Debug, Default)]
pub struct MergeQueue {
    inner: Mutex<Inner>,
}

impl MergeQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a line and returns the sequence number it was given.
    pub fn push(&self, timestamp: i64, line: String) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.heap.push(Reverse(OutputRecord {
            timestamp,
            sequence,
            line,
        }));
        sequence
    }

    /// Removes everything currently queued, smallest `(timestamp, sequence)` first.
    #[must_use]
    pub fn drain(&self) -> Vec<OutputRecord> {
        let heap = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut inner.heap)
        };
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|Reverse(record)| record)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .heap
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
