use parking_lot::Mutex;
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{BurstLimit, ThrottleConfig};

/// Spaces gateway requests to stay under the server's request quota.
///
/// Every request waits for the minimum interval since the previous one and,
/// when a burst limit is configured, until fewer than `max_requests` were
/// issued within the trailing window. The lock is held across the sleep so
/// that two callers can never be granted the same slot.
pub struct RequestThrottle {
    min_interval: Duration,
    burst: Option<BurstLimit>,
    history: Mutex<VecDeque<Instant>>,
}

impl RequestThrottle {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            min_interval: config.min_interval(),
            burst: config.burst_limit,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// A throttle that never waits.
    pub fn unlimited() -> Self {
        Self {
            min_interval: Duration::ZERO,
            burst: None,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until the next request may be sent, then record it.
    /// Returns how long the caller was held back.
    pub fn acquire(&self) -> Duration {
        let mut history = self.history.lock();
        let now = Instant::now();
        let ready_at = self.ready_at(&mut history, now);
        let waited = ready_at.saturating_duration_since(now);
        if !waited.is_zero() {
            debug!(waited_ms = waited.as_millis() as u64, "Throttling gateway request");
            thread::sleep(waited);
        }
        history.push_back(Instant::now());
        self.trim(&mut history);
        waited
    }

    fn ready_at(&self, history: &mut VecDeque<Instant>, now: Instant) -> Instant {
        let mut ready = now;
        if let Some(spaced) = history.back().and_then(|last| last.checked_add(self.min_interval)) {
            ready = ready.max(spaced);
        }
        if let Some(burst) = self.burst {
            let window = burst.window();
            while history
                .front()
                .and_then(|t| t.checked_add(window))
                .is_some_and(|expiry| expiry <= now)
            {
                history.pop_front();
            }
            if history.len() >= burst.max_requests {
                // The oldest of the last `max_requests` must leave the window.
                let idx = history.len() - burst.max_requests;
                if let Some(expiry) = history.get(idx).and_then(|t| t.checked_add(window)) {
                    ready = ready.max(expiry);
                }
            }
        }
        ready
    }

    fn trim(&self, history: &mut VecDeque<Instant>) {
        let keep = self.burst.map(|b| b.max_requests).unwrap_or(1).max(1);
        while history.len() > keep {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config(min_interval_ms: u64, burst: Option<(usize, u64)>) -> ThrottleConfig {
        ThrottleConfig {
            min_interval_ms,
            burst_limit: burst.map(|(max_requests, window_ms)| BurstLimit {
                max_requests,
                window_ms,
            }),
        }
    }

    #[test]
    fn test_first_request_is_immediate() {
        let throttle = RequestThrottle::new(&config(200, None));
        assert!(throttle.acquire().is_zero());
    }

    #[test]
    fn test_min_interval_between_requests() {
        let throttle = RequestThrottle::new(&config(40, None));
        let start = Instant::now();
        for _ in 0..4 {
            throttle.acquire();
        }
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_burst_window() {
        let throttle = RequestThrottle::new(&config(0, Some((3, 150))));
        let start = Instant::now();
        for _ in 0..3 {
            throttle.acquire();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        throttle.acquire();
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_concurrent_callers_are_spaced() {
        let throttle = Arc::new(RequestThrottle::new(&config(30, None)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&throttle);
                std::thread::spawn(move || t.acquire())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_unrepresentable_spacing_does_not_panic() {
        let throttle = RequestThrottle {
            min_interval: Duration::MAX,
            burst: None,
            history: Mutex::new(VecDeque::new()),
        };
        let now = Instant::now();
        let mut history = VecDeque::from([now]);
        assert_eq!(throttle.ready_at(&mut history, now), now);
    }

    #[test]
    fn test_unlimited_never_waits() {
        let throttle = RequestThrottle::unlimited();
        for _ in 0..10 {
            assert!(throttle.acquire().is_zero());
        }
    }
}
