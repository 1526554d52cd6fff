//! # RateLimiter
//!
//! Per-provider fixed 60s window counter (spec §4.3). Keyed by provider id in a
//! [`DashMap`] so each provider gets its own lock rather than contending on a
//! single mutex, mirroring the per-key discipline described in §5.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

const WINDOW: chrono::Duration = chrono::Duration::seconds(60);

#[derive(Debug, Clone, Copy)]
struct RateLimitState {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Fixed-window rate limiter. `allow` is the only mutating entry point besides
/// `reset`; both are safe to call concurrently across tasks.
#[derive(Default)]
pub struct RateLimiter {
    state: DashMap<String, RateLimitState>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps 1-4 of spec §4.3, evaluated against `now` so tests can control time.
    pub fn allow_at(&self, provider_id: &str, limit: Option<u32>, now: DateTime<Utc>) -> bool {
        let Some(limit) = limit else {
            return true;
        };

        // A fresh entry starts with reset_at == now, so `now >= reset_at` is true
        // and the window-reset branch below also handles first-touch correctly.
        let mut state = self.state.entry(provider_id.to_string()).or_insert(RateLimitState {
            count: 0,
            reset_at: now,
        });

        if now >= state.reset_at {
            state.count = 1;
            state.reset_at = now + WINDOW;
            true
        } else if state.count < limit {
            state.count += 1;
            true
        } else {
            false
        }
    }

    pub fn allow(&self, provider_id: &str, limit: Option<u32>) -> bool {
        self.allow_at(provider_id, limit, Utc::now())
    }

    /// Read-only variant of `allow` for the router's candidate-filtering pass
    /// (step 1): reports whether a call would currently be allowed without
    /// consuming a slot from the window.
    pub fn would_allow_at(&self, provider_id: &str, limit: Option<u32>, now: DateTime<Utc>) -> bool {
        let Some(limit) = limit else {
            return true;
        };
        match self.state.get(provider_id) {
            None => true,
            Some(state) => now >= state.reset_at || state.count < limit,
        }
    }

    pub fn would_allow(&self, provider_id: &str, limit: Option<u32>) -> bool {
        self.would_allow_at(provider_id, limit, Utc::now())
    }

    /// Clears state for a provider; idempotent.
    pub fn reset(&self, provider_id: &str) {
        self.state.remove(provider_id);
    }

    /// Evicts state for a deleted provider (Registry ownership rule in §3).
    pub fn evict(&self, provider_id: &str) {
        self.state.remove(provider_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn no_limit_always_allows() {
        let limiter = RateLimiter::new();
        for _ in 0..1000 {
            assert!(limiter.allow("p1", None));
        }
    }

    #[test]
    fn permits_at_most_limit_within_window() {
        let limiter = RateLimiter::new();
        let now = Utc::now();
        for _ in 0..3 {
            assert!(limiter.allow_at("p1", Some(3), now));
        }
        assert!(!limiter.allow_at("p1", Some(3), now));
    }

    #[test]
    fn resets_after_window_elapses() {
        let limiter = RateLimiter::new();
        let now = Utc::now();
        assert!(limiter.allow_at("p1", Some(1), now));
        assert!(!limiter.allow_at("p1", Some(1), now + Duration::seconds(30)));
        assert!(limiter.allow_at("p1", Some(1), now + Duration::seconds(61)));
    }

    #[test]
    fn reset_clears_state() {
        let limiter = RateLimiter::new();
        let now = Utc::now();
        assert!(limiter.allow_at("p1", Some(1), now));
        assert!(!limiter.allow_at("p1", Some(1), now));
        limiter.reset("p1");
        assert!(limiter.allow_at("p1", Some(1), now));
    }
}
