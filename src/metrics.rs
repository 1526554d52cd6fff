//! # MetricsRecorder
//!
//! Counters, rolling averages, and daily upserts (spec §4.6). `record` performs the
//! three writes in order — usage upsert, EMA latency, success rate + lastUsedAt —
//! all at-least-once with respect to counter semantics.

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;

const EMA_ALPHA: f64 = 0.1;

/// The outcome of one executed request, as reported by the [`crate::executor::Executor`].
pub struct RequestOutcome {
    pub success: bool,
    pub duration_ms: u64,
    pub tokens_used: u64,
    pub estimated_cost: f64,
    pub error_kind: Option<String>,
}

/// Per (provider, UTC day) usage counters. Append-on-write via upsert-increment;
/// immutable once a day rolls over.
#[derive(Debug, Clone, Default)]
pub struct UsageMetric {
    pub requests: u64,
    pub errors: u64,
    pub tokens: u64,
    pub cost: f64,
    pub avg_latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct ProviderRollup {
    total_requests: u64,
    total_errors: u64,
    success_rate: Option<f64>,
    last_used_at: Option<chrono::DateTime<Utc>>,
}

/// Owns the daily usage table and the rolling per-provider aggregates the router
/// reads.
#[derive(Default)]
pub struct MetricsRecorder {
    daily: DashMap<(String, NaiveDate), UsageMetric>,
    rollup: DashMap<String, ProviderRollup>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, provider_id: &str, outcome: &RequestOutcome) {
        self.record_at(provider_id, outcome, Utc::now())
    }

    pub fn record_at(&self, provider_id: &str, outcome: &RequestOutcome, now: chrono::DateTime<Utc>) {
        // 1. Upsert today's UsageMetric.
        let mut daily = self
            .daily
            .entry((provider_id.to_string(), now.date_naive()))
            .or_default();
        daily.requests += 1;
        if !outcome.success {
            daily.errors += 1;
        }
        daily.tokens += outcome.tokens_used;
        daily.cost += outcome.estimated_cost;

        // 2. EMA rolling latency: plain assignment on the first sample, then
        //    avg' = 0.9*avg + 0.1*durationMs.
        daily.avg_latency_ms = Some(match daily.avg_latency_ms {
            Some(prev) => (1.0 - EMA_ALPHA) * prev + EMA_ALPHA * outcome.duration_ms as f64,
            None => outcome.duration_ms as f64,
        });
        drop(daily);

        // 3. successRate and lastUsedAt on the provider-wide rollup (P6).
        let mut rollup = self.rollup.entry(provider_id.to_string()).or_default();
        rollup.total_requests += 1;
        if !outcome.success {
            rollup.total_errors += 1;
        }
        rollup.success_rate = if rollup.total_requests > 0 {
            Some((rollup.total_requests - rollup.total_errors) as f64 / rollup.total_requests as f64)
        } else {
            None
        };
        rollup.last_used_at = Some(now);
    }

    pub fn usage_for(&self, provider_id: &str, date: NaiveDate) -> UsageMetric {
        self.daily
            .get(&(provider_id.to_string(), date))
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn success_rate(&self, provider_id: &str) -> Option<f64> {
        self.rollup.get(provider_id).and_then(|r| r.success_rate)
    }

    pub fn avg_latency_ms(&self, provider_id: &str, date: NaiveDate) -> Option<f64> {
        self.daily.get(&(provider_id.to_string(), date)).and_then(|m| m.avg_latency_ms)
    }

    pub fn total_requests(&self, provider_id: &str) -> u64 {
        self.rollup.get(provider_id).map(|r| r.total_requests).unwrap_or(0)
    }

    pub fn total_errors(&self, provider_id: &str) -> u64 {
        self.rollup.get(provider_id).map(|r| r.total_errors).unwrap_or(0)
    }

    pub fn last_used_at(&self, provider_id: &str) -> Option<chrono::DateTime<Utc>> {
        self.rollup.get(provider_id).and_then(|r| r.last_used_at)
    }

    /// Evicts all rollup/daily state for a deleted provider. Historical
    /// UsageMetric rows written before deletion are owned by the repository, not
    /// this in-memory table, and are unaffected.
    pub fn evict(&self, provider_id: &str) {
        self.rollup.remove(provider_id);
        self.daily.retain(|(pid, _), _| pid != provider_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool, duration_ms: u64) -> RequestOutcome {
        RequestOutcome {
            success,
            duration_ms,
            tokens_used: 10,
            estimated_cost: 0.001,
            error_kind: None,
        }
    }

    #[test]
    fn success_then_failure_yields_half_success_rate() {
        let recorder = MetricsRecorder::new();
        recorder.record("p1", &outcome(true, 100));
        recorder.record("p1", &outcome(false, 200));

        let today = Utc::now().date_naive();
        let usage = recorder.usage_for("p1", today);
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.errors, 1);
        assert_eq!(recorder.success_rate("p1"), Some(0.5));
    }

    #[test]
    fn first_latency_sample_is_assigned_not_emad() {
        let recorder = MetricsRecorder::new();
        recorder.record("p1", &outcome(true, 500));
        let today = Utc::now().date_naive();
        assert_eq!(recorder.avg_latency_ms("p1", today), Some(500.0));
    }

    #[test]
    fn subsequent_samples_use_ema() {
        let recorder = MetricsRecorder::new();
        recorder.record("p1", &outcome(true, 500));
        recorder.record("p1", &outcome(true, 1000));
        let today = Utc::now().date_naive();
        // 0.9*500 + 0.1*1000 = 550
        assert_eq!(recorder.avg_latency_ms("p1", today), Some(550.0));
    }

    #[test]
    fn no_requests_has_no_success_rate() {
        let recorder = MetricsRecorder::new();
        assert_eq!(recorder.success_rate("unknown"), None);
    }

    #[test]
    fn rollup_totals_and_last_used_at_are_readable() {
        let recorder = MetricsRecorder::new();
        assert_eq!(recorder.total_requests("p1"), 0);
        assert!(recorder.last_used_at("p1").is_none());

        recorder.record("p1", &outcome(true, 100));
        recorder.record("p1", &outcome(false, 200));

        assert_eq!(recorder.total_requests("p1"), 2);
        assert_eq!(recorder.total_errors("p1"), 1);
        assert!(recorder.last_used_at("p1").is_some());
    }
}
