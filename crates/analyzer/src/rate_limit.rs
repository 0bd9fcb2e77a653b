use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// Spaces outbound scoring calls at least `min_interval` apart.
///
/// Owned by a single [`crate::Analyzer`]; `acquire` takes `&mut self`, so two
/// callers can never race on the last-call timestamp.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until the interval since the previous permitted call has
    /// elapsed, then record this call.  The first call never waits.
    pub fn acquire(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limit: waiting");
                thread::sleep(wait);
            }
        }
        self.last_call = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(1200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_acquire_does_not_wait() {
        let mut limiter = RateLimiter::new(Duration::from_secs(5));
        let started = Instant::now();
        limiter.acquire();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn back_to_back_acquires_are_spaced() {
        let interval = Duration::from_millis(60);
        let mut limiter = RateLimiter::new(interval);
        limiter.acquire();
        let first = Instant::now();
        limiter.acquire();
        assert!(first.elapsed() >= interval - Duration::from_millis(5));
    }

    #[test]
    fn no_wait_once_interval_has_passed() {
        let interval = Duration::from_millis(20);
        let mut limiter = RateLimiter::new(interval);
        limiter.acquire();
        thread::sleep(interval * 2);
        let started = Instant::now();
        limiter.acquire();
        assert!(started.elapsed() < interval);
    }

    #[test]
    fn default_interval_is_1200ms() {
        assert_eq!(RateLimiter::default().min_interval(), Duration::from_millis(1200));
    }
}
