use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration, Instant};
use parking_lot::Mutex;

/// Rate limiter for market-data provider calls
///
/// Backfill walks issue one request per trading day per ticker, so a single
/// seeding run can easily exceed the provider's per-minute quota without it.
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    last_request: Arc<Mutex<Instant>>,
    min_delay: Duration,
}

impl RateLimiter {
    /// * `max_concurrent` - Maximum number of in-flight provider requests
    /// * `requests_per_minute` - Request budget per minute (0 disables the delay)
    pub fn new(max_concurrent: usize, requests_per_minute: u32) -> Self {
        let min_delay_ms = if requests_per_minute == 0 {
            0
        } else {
            60_000 / requests_per_minute as u64
        };
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            last_request: Arc::new(Mutex::new(Instant::now() - Duration::from_secs(60))),
            min_delay: Duration::from_millis(min_delay_ms),
        }
    }

    /// Waits for a permit and for the minimum spacing since the previous request.
    ///
    /// Returns a guard that releases the permit when dropped.
    pub async fn acquire(&self) -> RateLimitGuard {
        // A closed semaphore only happens on shutdown; let the caller proceed unthrottled.
        let permit = self.semaphore.clone().acquire_owned().await.ok();

        let wait_time = {
            let last = self.last_request.lock();
            let elapsed = last.elapsed();

            if elapsed < self.min_delay {
                Some(self.min_delay - elapsed)
            } else {
                None
            }
        };

        if let Some(delay) = wait_time {
            sleep(delay).await;
        }

        *self.last_request.lock() = Instant::now();

        RateLimitGuard { _permit: permit }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Holds a rate limit permit until dropped
pub struct RateLimitGuard {
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
}
