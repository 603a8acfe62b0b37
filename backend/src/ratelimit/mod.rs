//! Per-caller, per-operation request limiter.
//!
//! The limiter is an explicit value constructed in `main` and shared through
//! `AppState`, so it can be exercised in isolation and swapped for a
//! distributed backend if the service is ever scaled horizontally. Keys are
//! `"{operation}:{profile_id}"` strings; each key owns an independent window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Ceiling and window length for one operation class.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitQuota {
    pub window: Duration,
    pub max_requests: u32,
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window (0 when rejected).
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_in: Duration,
}

impl RateLimitDecision {
    /// Seconds the caller should wait before retrying, floored at 1.
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_in.as_secs().max(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

const PERIODIC_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const CLEANUP_SIZE_THRESHOLD: usize = 10_000;

/// Sliding-window counter store.
#[derive(Debug)]
pub struct RateLimiter {
    store: Mutex<HashMap<String, RateLimitEntry>>,
    last_cleanup: Mutex<Instant>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            // Start at "now" so cleanup does not fire immediately during startup.
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    /// Checks and counts one request for `identifier` under `quota`.
    ///
    /// A rejected request does not advance the counter; the caller must not
    /// mutate any other state when `allowed` is false.
    pub fn check(&self, identifier: &str, quota: RateLimitQuota) -> RateLimitDecision {
        self.check_at(identifier, quota, Instant::now())
    }

    fn check_at(
        &self,
        identifier: &str,
        quota: RateLimitQuota,
        now: Instant,
    ) -> RateLimitDecision {
        let decision = {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            let entry = store
                .entry(identifier.to_string())
                .or_insert(RateLimitEntry {
                    count: 0,
                    window_start: now,
                });

            if now.duration_since(entry.window_start) >= quota.window {
                entry.count = 0;
                entry.window_start = now;
            }

            let elapsed = now.duration_since(entry.window_start);
            let reset_in = quota.window.saturating_sub(elapsed);

            if entry.count >= quota.max_requests {
                RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_in,
                }
            } else {
                entry.count += 1;
                RateLimitDecision {
                    allowed: true,
                    remaining: quota.max_requests - entry.count,
                    reset_in,
                }
            }
        };

        self.maybe_cleanup(quota.window, now);
        decision
    }

    /// Opportunistically drops entries whose window expired more than one
    /// window-length ago. Best-effort: correctness of concurrent checks never
    /// depends on it.
    fn maybe_cleanup(&self, window: Duration, now: Instant) {
        let due = {
            let last = self.last_cleanup.lock().unwrap_or_else(|e| e.into_inner());
            let store_len = self
                .store
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len();
            store_len > CLEANUP_SIZE_THRESHOLD
                || now.duration_since(*last) >= PERIODIC_CLEANUP_INTERVAL
        };
        if !due {
            return;
        }

        let stale_after = window.saturating_mul(2);
        {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            store.retain(|_, entry| now.duration_since(entry.window_start) < stale_after);
        }
        let mut last = self.last_cleanup.lock().unwrap_or_else(|e| e.into_inner());
        *last = now;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(max_requests: u32, window_secs: u64) -> RateLimitQuota {
        RateLimitQuota {
            window: Duration::from_secs(window_secs),
            max_requests,
        }
    }

    #[test]
    fn first_observation_opens_a_window() {
        let limiter = RateLimiter::new();
        let decision = limiter.check("check_in:u1", quota(5, 60));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn remaining_counts_down_then_rejects() {
        let limiter = RateLimiter::new();
        let q = quota(3, 60);
        let base = Instant::now();

        assert_eq!(limiter.check_at("hb:u1", q, base).remaining, 2);
        assert_eq!(limiter.check_at("hb:u1", q, base).remaining, 1);
        assert_eq!(limiter.check_at("hb:u1", q, base).remaining, 0);

        let rejected = limiter.check_at("hb:u1", q, base + Duration::from_secs(10));
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset_in, Duration::from_secs(50));
        assert_eq!(rejected.retry_after_secs(), 50);
    }

    #[test]
    fn nth_plus_one_call_within_window_is_rejected() {
        let limiter = RateLimiter::new();
        let q = quota(10, 60);
        let base = Instant::now();
        for _ in 0..10 {
            assert!(limiter.check_at("forced:m1", q, base).allowed);
        }
        assert!(!limiter.check_at("forced:m1", q, base).allowed);
    }

    #[test]
    fn window_elapse_resets_the_counter() {
        let limiter = RateLimiter::new();
        let q = quota(2, 60);
        let base = Instant::now();

        assert!(limiter.check_at("ci:u1", q, base).allowed);
        assert!(limiter.check_at("ci:u1", q, base).allowed);
        assert!(!limiter.check_at("ci:u1", q, base).allowed);

        let after_window = base + Duration::from_secs(61);
        let decision = limiter.check_at("ci:u1", q, after_window);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn distinct_identifiers_are_independent() {
        let limiter = RateLimiter::new();
        let q = quota(1, 60);
        let base = Instant::now();

        assert!(limiter.check_at("ci:u1", q, base).allowed);
        assert!(!limiter.check_at("ci:u1", q, base).allowed);
        assert!(limiter.check_at("ci:u2", q, base).allowed);
        assert!(limiter.check_at("hb:u1", q, base).allowed);
    }

    #[test]
    fn rejection_preserves_retry_after_floor() {
        let limiter = RateLimiter::new();
        let q = quota(1, 60);
        let base = Instant::now();
        limiter.check_at("ci:u1", q, base);
        let rejected = limiter.check_at("ci:u1", q, base + Duration::from_millis(59_800));
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after_secs(), 1);
    }

    #[test]
    fn cleanup_reclaims_entries_older_than_twice_the_window() {
        let limiter = RateLimiter::new();
        let q = quota(5, 60);
        let base = Instant::now();

        limiter.check_at("ci:stale", q, base);
        assert_eq!(limiter.len(), 1);

        // Past the periodic interval and past 2x window: the stale entry goes,
        // the fresh one stays.
        let later = base + PERIODIC_CLEANUP_INTERVAL + Duration::from_secs(1);
        limiter.check_at("ci:fresh", q, later);
        assert_eq!(limiter.len(), 1);

        let decision = limiter.check_at("ci:fresh", q, later);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 3);
    }
}
