//! Minimum spacing between the actions of one executor instance.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Tracks the last action of its owner.
///
/// Each executor owns its own limiter, so two executors never delay each
/// other. The first action is never delayed.
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    last_action: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_action: Mutex::new(None),
        }
    }

    /// Suspend until `delay` has passed since the previous action, then
    /// stamp the new action. Returns how long the caller waited.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_action.lock().await;
        let mut waited = Duration::ZERO;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                waited = self.delay - elapsed;
                debug!(wait_ms = waited.as_millis() as u64, "Rate limit: waiting");
                tokio::time::sleep(waited).await;
            }
        }
        *last = Some(Instant::now());
        waited
    }

    /// Time of the last stamped action, if any.
    pub async fn last_action(&self) -> Option<Instant> {
        *self.last_action.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_action_is_not_delayed() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        assert_eq!(limiter.acquire().await, Duration::ZERO);
        assert!(limiter.last_action().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn second_action_waits_out_the_delay() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();
        limiter.acquire().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        let waited = limiter.acquire().await;
        assert_eq!(waited, Duration::from_millis(1500));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_after_delay_has_passed() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn instances_do_not_share_state() {
        let a = RateLimiter::new(Duration::from_secs(5));
        let b = RateLimiter::new(Duration::from_secs(5));
        a.acquire().await;
        assert_eq!(b.acquire().await, Duration::ZERO);
    }
}
