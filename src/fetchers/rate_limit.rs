use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a fixed minimum interval between provider calls across all tasks.
///
/// Each caller reserves the next free slot under the lock and then sleeps
/// until that slot outside of it, so concurrent callers queue up in order
/// without holding the lock across an await.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the caller may issue its request.
    pub async fn acquire(&self) {
        let wait = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!("Rate limiter: waiting {:?} before next request", wait);
            tokio::time::sleep(wait).await;
        }
    }
}
