//! Token-bucket rate limiting for source APIs.

use anyhow::{bail, Result};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A minimal token bucket: one permit per `interval`, burst of one.
///
/// `wait` serializes callers and sleeps until the next slot frees, so a
/// limiter shared across tasks enforces the source's global request rate.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Block until a request slot is available, or until cancelled.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = if *next > now { *next } else { now };
            *next = slot + self.interval;
            slot
        };

        let delay = slot.saturating_duration_since(Instant::now());
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => bail!("cancelled while waiting for rate limit"),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_wait_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let start = Instant::now();
        limiter.wait(&cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_second_wait_respects_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let cancel = CancellationToken::new();
        let start = Instant::now();
        limiter.wait(&cancel).await.unwrap();
        limiter.wait(&cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        limiter.wait(&cancel).await.unwrap();

        cancel.cancel();
        let err = limiter.wait(&cancel).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
