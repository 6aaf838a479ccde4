use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Run-scoped call budget for the upstream API.
///
/// Allows bursts of up to `capacity` calls, then refills as old calls age
/// out of the window. Every `acquire` records its grant time in a log, so
/// no rolling `window` ever contains more than `capacity` grants no matter
/// how requests are interleaved.
///
/// Uses the tokio clock, so tests can drive it with `start_paused = true`.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    // Grant times, oldest first. Never longer than `capacity`.
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            capacity,
            window,
            grants: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits until one more call fits in the window, then claims it.
    ///
    /// The lock is held across the sleep so concurrent callers queue up
    /// behind each other instead of all waking at the same instant.
    pub async fn acquire(&self) {
        let mut grants = self.grants.lock().await;
        loop {
            let now = Instant::now();
            while grants
                .front()
                .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
            {
                grants.pop_front();
            }

            if grants.len() < self.capacity {
                grants.push_back(now);
                return;
            }

            // Sleep exactly until the oldest grant leaves the window
            if let Some(oldest) = grants.front().copied() {
                let wake = oldest + self.window;
                tracing::trace!(
                    wait_ms = wake.saturating_duration_since(now).as_millis() as u64,
                    "Rate limiter full, waiting"
                );
                tokio::time::sleep_until(wake).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity_is_immediate() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_minimum_time_when_full() {
        let limiter = RateLimiter::new(2, Duration::from_millis(1000));
        let start = Instant::now();
        limiter.acquire().await;
        tokio::time::advance(Duration::from_millis(300)).await;
        limiter.acquire().await;

        // Third call must wait for the first grant (t=0) to expire at t=1000
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_millis(1000));

        // Fourth waits for the second grant (t=300) to expire at t=1300
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_millis(1300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rolling_window_never_exceeds_capacity() {
        let capacity = 4;
        let window = Duration::from_secs(1);
        let limiter = RateLimiter::new(capacity, window);
        let start = Instant::now();
        let mut stamps = Vec::new();

        for i in 0..40u64 {
            limiter.acquire().await;
            stamps.push(start.elapsed());
            // Irregular gaps between calls
            tokio::time::advance(Duration::from_millis((i * 37) % 120)).await;
        }

        for (i, t) in stamps.iter().enumerate() {
            let in_window = stamps[i..].iter().filter(|s| **s < *t + window).count();
            assert!(
                in_window <= capacity as usize,
                "{in_window} calls within one window starting at {t:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_budget() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(1)));
        let start = Instant::now();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.acquire().await;
                    start.elapsed()
                })
            })
            .collect();

        let mut stamps = Vec::new();
        for h in handles {
            stamps.push(h.await.unwrap());
        }
        stamps.sort();

        // Six calls at two per second take three windows
        assert_eq!(stamps[0], Duration::ZERO);
        assert_eq!(stamps[1], Duration::ZERO);
        assert_eq!(stamps[2], Duration::from_secs(1));
        assert_eq!(stamps[5], Duration::from_secs(2));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert_eq!(limiter.capacity(), 1);
    }
}
