// Request pacing for remote classifiers.
//
// Perspective's free tier allows 1 QPS, and OpenAI keys carry per-minute
// quotas. A caller only stamps the shared clock once it is actually let
// through; while waiting it holds nothing, so a caller cancelled by the
// provider timeout gives up no capacity.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Spaces requests at least `interval` apart.
#[derive(Clone)]
pub struct RateLimiter {
    interval: Duration,
    /// When the last request was let through.
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Allow at most `requests_per_second` requests per second.
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / requests_per_second),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Allow at most `requests_per_minute` requests per minute.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(f64::from(requests_per_minute.max(1)) / 60.0)
    }

    /// Wait until a request is allowed, then return.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut last = self.last_request.lock().await;
                let now = Instant::now();
                match *last {
                    Some(at) if now < at + self.interval => at + self.interval - now,
                    _ => {
                        *last = Some(now);
                        return;
                    }
                }
            };
            // Another waiter may win the slot; re-check after sleeping
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let limiter = RateLimiter::new(1.0);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_second_request_waits_for_its_slot() {
        let limiter = RateLimiter::new(2.0); // 500ms spacing
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(400),
            "Expected ~500ms delay, got {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_per_minute_interval() {
        let limiter = RateLimiter::per_minute(120);
        assert_eq!(limiter.interval, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_cancelled_waiters_do_not_consume_capacity() {
        let limiter = RateLimiter::new(10.0); // 100ms spacing
        limiter.acquire().await;

        // A burst of callers that all give up before their turn
        let mut abandoned = Vec::new();
        for _ in 0..30 {
            let limiter = limiter.clone();
            abandoned.push(tokio::spawn(async move {
                tokio::time::timeout(Duration::from_millis(20), limiter.acquire())
                    .await
                    .is_ok()
            }));
        }
        for handle in abandoned {
            assert!(!handle.await.unwrap());
        }

        // Capacity is untouched: the next caller gets through within one interval
        let start = Instant::now();
        let admitted = tokio::time::timeout(Duration::from_millis(300), limiter.acquire()).await;
        assert!(admitted.is_ok());
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_concurrent_callers_keep_flowing_under_timeouts() {
        let limiter = RateLimiter::new(10.0);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::timeout(Duration::from_millis(350), limiter.acquire())
                    .await
                    .is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        // ~350ms at 10/s lets three or four through, never zero and never all
        assert!((2..=5).contains(&admitted), "admitted {admitted}");
    }
}
