//! # CircuitBreaker
//!
//! Per-provider CLOSED/OPEN/HALF_OPEN state machine (spec §4.4). Thresholds are
//! fixed by the spec rather than configurable per instance: open after 5
//! consecutive failures, half-open after 60s, any half-open failure re-opens with a
//! fresh timer. State transitions are monotonic within a request (P4): no
//! CLOSED→HALF_OPEN shortcut.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::provider::CircuitState;

const FAILURE_THRESHOLD: u32 = 5;
const COOLDOWN: chrono::Duration = chrono::Duration::seconds(60);

#[derive(Debug, Clone, Copy)]
struct BreakerState {
    status: CircuitState,
    failure_count: u32,
    opened_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            status: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            next_retry_at: None,
        }
    }
}

/// A table of per-provider breaker state, keyed by provider id. Fine-grained
/// per-key access via [`DashMap`] rather than one coarse lock over all providers.
#[derive(Default)]
pub struct CircuitBreaker {
    state: DashMap<String, BreakerState>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `allow(providerId)` per spec §4.4, evaluated against `now`.
    pub fn allow_at(&self, provider_id: &str, now: DateTime<Utc>) -> bool {
        let mut entry = self.state.entry(provider_id.to_string()).or_default();
        match entry.status {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let next_retry = entry.next_retry_at.unwrap_or(now);
                if now < next_retry {
                    false
                } else {
                    entry.status = CircuitState::HalfOpen;
                    tracing::info!(provider_id, "circuit breaker transitioning to HALF_OPEN");
                    true
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub fn allow(&self, provider_id: &str) -> bool {
        self.allow_at(provider_id, Utc::now())
    }

    /// Read-only variant of `allow` for the router's candidate-filtering pass
    /// (step 1): reports whether a call would currently be allowed without
    /// performing the OPEN->HALF_OPEN transition `allow` does as a side effect.
    pub fn would_allow_at(&self, provider_id: &str, now: DateTime<Utc>) -> bool {
        match self.state.get(provider_id).map(|s| *s) {
            None | Some(BreakerState { status: CircuitState::Closed, .. }) => true,
            Some(BreakerState { status: CircuitState::HalfOpen, .. }) => true,
            Some(BreakerState {
                status: CircuitState::Open,
                next_retry_at,
                ..
            }) => now >= next_retry_at.unwrap_or(now),
        }
    }

    pub fn would_allow(&self, provider_id: &str) -> bool {
        self.would_allow_at(provider_id, Utc::now())
    }

    /// Decrement failure count toward 0; closes and resets from HALF_OPEN.
    pub fn record_success(&self, provider_id: &str) {
        let mut entry = self.state.entry(provider_id.to_string()).or_default();
        match entry.status {
            CircuitState::HalfOpen => {
                entry.status = CircuitState::Closed;
                entry.failure_count = 0;
                entry.opened_at = None;
                entry.next_retry_at = None;
                tracing::info!(provider_id, "circuit breaker CLOSED after recovery probe");
            }
            _ => {
                entry.failure_count = entry.failure_count.saturating_sub(1);
            }
        }
    }

    /// Increment failure count; opens (or re-opens from half-open) at threshold.
    pub fn record_failure_at(&self, provider_id: &str, now: DateTime<Utc>) {
        let mut entry = self.state.entry(provider_id.to_string()).or_default();
        let was_half_open = entry.status == CircuitState::HalfOpen;
        entry.failure_count += 1;

        if was_half_open || entry.failure_count >= FAILURE_THRESHOLD {
            entry.status = CircuitState::Open;
            entry.opened_at = Some(now);
            entry.next_retry_at = Some(now + COOLDOWN);
            tracing::warn!(
                provider_id,
                failure_count = entry.failure_count,
                "circuit breaker OPEN"
            );
        }
    }

    pub fn record_failure(&self, provider_id: &str) {
        self.record_failure_at(provider_id, Utc::now());
    }

    pub fn state_of(&self, provider_id: &str) -> CircuitState {
        self.state
            .get(provider_id)
            .map(|s| s.status)
            .unwrap_or(CircuitState::Closed)
    }

    /// Idempotent operator reset.
    pub fn reset(&self, provider_id: &str) {
        self.state.remove(provider_id);
    }

    /// Evicts state for a deleted provider.
    pub fn evict(&self, provider_id: &str) {
        self.state.remove(provider_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn closed_state_always_allows() {
        let cb = CircuitBreaker::new();
        assert!(cb.allow("p1"));
        assert_eq!(cb.state_of("p1"), CircuitState::Closed);
    }

    #[test]
    fn opens_after_five_consecutive_failures() {
        let cb = CircuitBreaker::new();
        let now = Utc::now();
        for _ in 0..5 {
            cb.record_failure_at("p1", now);
        }
        assert_eq!(cb.state_of("p1"), CircuitState::Open);
        assert!(!cb.allow_at("p1", now));
        assert!(!cb.allow_at("p1", now + Duration::seconds(59)));
    }

    #[test]
    fn half_opens_after_cooldown_and_closes_on_success() {
        let cb = CircuitBreaker::new();
        let now = Utc::now();
        for _ in 0..5 {
            cb.record_failure_at("p1", now);
        }
        let after_cooldown = now + Duration::seconds(60);
        assert!(cb.allow_at("p1", after_cooldown));
        assert_eq!(cb.state_of("p1"), CircuitState::HalfOpen);

        cb.record_success("p1");
        assert_eq!(cb.state_of("p1"), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_timer() {
        let cb = CircuitBreaker::new();
        let now = Utc::now();
        for _ in 0..5 {
            cb.record_failure_at("p1", now);
        }
        let probe_time = now + Duration::seconds(60);
        assert!(cb.allow_at("p1", probe_time));
        cb.record_failure_at("p1", probe_time);
        assert_eq!(cb.state_of("p1"), CircuitState::Open);
        assert!(!cb.allow_at("p1", probe_time + Duration::seconds(59)));
        assert!(cb.allow_at("p1", probe_time + Duration::seconds(60)));
    }

    #[test]
    fn reset_is_idempotent() {
        let cb = CircuitBreaker::new();
        cb.reset("never-seen");
        cb.record_failure("p1");
        cb.reset("p1");
        assert_eq!(cb.state_of("p1"), CircuitState::Closed);
    }
}
