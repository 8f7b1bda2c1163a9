use governor::{Quota, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Fixed minimum spacing between outbound calls
///
/// Clones share the same limiter. A zero interval disables throttling.
#[derive(Clone, Default)]
pub struct Throttle {
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval).map(|quota| Arc::new(RateLimiter::direct(quota)));
        Self { limiter }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Wait until the next call is allowed
    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_zero_interval_disables() {
        assert!(!Throttle::from_millis(0).is_enabled());
        assert!(Throttle::from_millis(10).is_enabled());
    }

    #[tokio::test]
    async fn test_spaces_consecutive_calls() {
        let throttle = Throttle::from_millis(50);
        let start = Instant::now();
        throttle.wait().await;
        throttle.wait().await;
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_disabled_is_immediately_ready() {
        let throttle = Throttle::disabled();
        for _ in 0..10 {
            let mut wait = tokio_test::task::spawn(throttle.wait());
            tokio_test::assert_ready!(wait.poll());
        }
    }
}
