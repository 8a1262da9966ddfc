//! Outbound request budget
//!
//! One [`RateLimiter`] is shared by every upstream client: the address lookups and the
//! valuation fetches count against the same quota.
//!
//! Grants are tracked as a sliding-window log: the instants of the most recent `limit`
//! grants. A caller is admitted when fewer than `limit` grants fall inside the last
//! window, so a burst of up to `limit` passes immediately and no rolling window ever
//! holds more than `limit` grants.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared request rate limiter (max N acquisitions per rolling second)
#[derive(Debug)]
pub struct RateLimiter {
    grants: Mutex<VecDeque<Instant>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    /// Limiter admitting at most `requests_per_second` per rolling second
    pub fn per_second(requests_per_second: NonZeroU32) -> Self {
        Self::with_window(requests_per_second, Duration::from_secs(1))
    }

    /// Limiter admitting at most `limit` acquisitions per rolling `window`
    pub fn with_window(limit: NonZeroU32, window: Duration) -> Self {
        let limit = limit.get() as usize;
        Self {
            grants: Mutex::new(VecDeque::with_capacity(limit)),
            limit,
            window,
        }
    }

    /// Wait until a request may be sent
    ///
    /// Waiters queue on the internal mutex, which is fair, so callers are admitted in
    /// arrival order.
    pub async fn acquire(&self) {
        let mut grants = self.grants.lock().await;

        loop {
            let now = Instant::now();
            while let Some(&oldest) = grants.front() {
                if now.duration_since(oldest) >= self.window {
                    grants.pop_front();
                } else {
                    break;
                }
            }

            match grants.front() {
                Some(&oldest) if grants.len() >= self.limit => {
                    let ready_at = oldest + self.window;
                    tracing::trace!(
                        wait_ms = ready_at.duration_since(now).as_millis() as u64,
                        "Request budget exhausted, waiting"
                    );
                    tokio::time::sleep_until(ready_at).await;
                }
                _ => {
                    grants.push_back(now);
                    return;
                }
            }
        }
    }

    /// Configured ceiling per window
    pub fn limit(&self) -> u32 {
        self.limit as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn nz(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    /// Every run of `limit + 1` consecutive grants must span at least one window
    fn assert_window_ceiling(times: &[Instant], limit: usize, window: Duration) {
        for (i, start) in times.iter().enumerate() {
            if let Some(end) = times.get(i + limit) {
                assert!(
                    end.duration_since(*start) >= window,
                    "grants {}..={} fall within {:?}",
                    i,
                    i + limit,
                    end.duration_since(*start)
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_burst_is_immediate() {
        let limiter = RateLimiter::per_second(nz(5));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_times_burst_respects_rolling_window() {
        let limit = 4;
        let limiter = RateLimiter::per_second(nz(limit));
        let mut times = Vec::new();

        for _ in 0..(10 * limit) {
            limiter.acquire().await;
            times.push(Instant::now());
        }

        assert_window_ceiling(&times, limit as usize, Duration::from_secs(1));
        // 40 grants at 4/s need at least 9 full windows after the first burst
        assert!(times[times.len() - 1].duration_since(times[0]) >= Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_across_tasks() {
        let limiter = Arc::new(RateLimiter::per_second(nz(3)));
        let times = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            let times = Arc::clone(&times);
            handles.push(tokio::spawn(async move {
                for _ in 0..6 {
                    limiter.acquire().await;
                    times.lock().unwrap().push(Instant::now());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut times = times.lock().unwrap().clone();
        times.sort();
        assert_eq!(times.len(), 18);
        assert_window_ceiling(&times, 3, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_period_refills_budget() {
        let limiter = RateLimiter::per_second(nz(2));
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_secs(2)).await;

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_limit_reported() {
        let limiter = RateLimiter::per_second(nz(7));
        assert_eq!(limiter.limit(), 7);
    }
}
