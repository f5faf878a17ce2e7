// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Refillable permit pool that keeps fetch calls under the provider's request
//! rate. Permits are consumed by each call and only come back through refill.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    capacity: usize,
    refill_interval: Duration,
}

impl RateLimiter {
    /// Starts full. Every `refill_interval` the pool is topped back up to
    /// `capacity`.
    #[must_use]
    pub fn new(capacity: usize, refill_interval: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            refill_interval,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Takes one permit. Returns `false` if `cancel` fired first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            permit = self.permits.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
        }
    }

    /// Adds up to `capacity` permits without going over `capacity`.
    ///
    /// Only refill adds permits, so the pool cannot grow past `capacity`
    /// between the read and the add.
    pub fn refill(&self) -> usize {
        let missing = self.capacity.saturating_sub(self.available());
        if missing > 0 {
            self.permits.add_permits(missing);
        }
        missing
    }

    /// Runs [`RateLimiter::refill`] every interval until `cancel` fires.
    pub fn spawn_refill(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Rate limiter refill stopped");
                        break;
                    }
                    () = tokio::time::sleep(limiter.refill_interval) => {
                        let added = limiter.refill();
                        if added > 0 {
                            debug!("Refilled {added} permit(s)");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_permits_are_consumed() {
        let limiter = RateLimiter::new(5, Duration::from_millis(1100));
        let cancel = CancellationToken::new();
        for _ in 0..5 {
            assert!(limiter.acquire(&cancel).await);
        }
        assert_eq!(limiter.available(), 0);
    }

    #[test]
    fn test_refill_is_capped() {
        let limiter = RateLimiter::new(5, Duration::from_millis(1100));
        assert_eq!(limiter.refill(), 0);
        assert_eq!(limiter.available(), 5);
    }

    #[tokio::test]
    async fn test_refill_tops_up_to_capacity() {
        let limiter = RateLimiter::new(5, Duration::from_millis(1100));
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            assert!(limiter.acquire(&cancel).await);
        }
        assert_eq!(limiter.refill(), 3);
        assert_eq!(limiter.available(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_returns_on_cancel() {
        let limiter = RateLimiter::new(0, Duration::from_millis(1100));
        let cancel = CancellationToken::new();
        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        assert!(!waiter.await.expect("acquire task panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_bounds_calls_per_window() {
        let limiter = RateLimiter::new(5, Duration::from_millis(1100));
        let cancel = CancellationToken::new();
        let refill = limiter.spawn_refill(cancel.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let started = Instant::now();
        let caller = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                while limiter.acquire(&cancel).await {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep_until(started + Duration::from_secs(10)).await;
        let made = calls.load(Ordering::SeqCst);
        cancel.cancel();
        caller.await.expect("caller panicked");
        refill.await.expect("refill panicked");

        // 5 up front, then 5 per full 1.1s interval
        assert!(made <= 5 + 5 * 9, "{made} calls in 10s");
        assert!(made >= 5 + 5 * 8, "{made} calls in 10s");
    }
}
