//! # HealthProbe
//!
//! Periodic background reachability check (spec §4.5). Runs as a named,
//! stoppable `tokio::spawn` task rather than being driven inline by request
//! traffic, so tests can tick it deterministically and production can join it on
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::provider::HealthStatus;

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(300);
const SKIP_WINDOW: Duration = Duration::from_secs(240);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const DEGRADED_THRESHOLD_MS: u64 = 2000;
const CONSECUTIVE_UNHEALTHY_DISABLE: u32 = 5;

/// What [`HealthProbe`] needs from whatever owns the provider table — implemented
/// by [`crate::registry::Registry`]. Kept as a trait so this module doesn't need
/// to know about the registry's internals (adapter cache, repository, vault).
#[async_trait]
pub trait ProbeTarget: Send + Sync {
    /// Provider ids due for a probe: active, and either never checked or checked
    /// more than [`SKIP_WINDOW`] ago.
    async fn providers_due_for_probe(&self) -> Vec<String>;

    /// Runs one probe call against `provider_id`'s adapter within `timeout`,
    /// returning `(reachable, latency_ms)`.
    async fn probe_provider(&self, provider_id: &str, timeout: Duration) -> (bool, Option<u64>);

    /// Records the outcome of one probe: classifies health, updates
    /// consecutive-unhealthy count, and auto-disables + publishes
    /// `PROVIDER_DISABLED` once the threshold is reached.
    async fn apply_probe_result(&self, provider_id: &str, reachable: bool, latency_ms: Option<u64>);
}

/// Classifies one probe outcome per §4.5: unreachable -> Unhealthy; reachable and
/// under the degraded threshold -> Healthy; reachable but slow -> Degraded.
pub fn classify(reachable: bool, latency_ms: Option<u64>) -> HealthStatus {
    if !reachable {
        return HealthStatus::Unhealthy;
    }
    match latency_ms {
        Some(ms) if ms >= DEGRADED_THRESHOLD_MS => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    }
}

/// Whether `consecutive_unhealthy` (after increment) crosses the auto-disable
/// threshold.
pub fn should_auto_disable(consecutive_unhealthy: u32) -> bool {
    consecutive_unhealthy >= CONSECUTIVE_UNHEALTHY_DISABLE
}

/// A running probe loop. Dropping this without calling [`Self::stop`] leaves the
/// background task running; callers that care about a clean shutdown should
/// always call `stop`.
pub struct HealthProbeHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl HealthProbeHandle {
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }
}

/// Spawns the periodic probe loop at `interval`, calling back into `target` for
/// both the due-list and the per-provider probe/record steps.
pub fn spawn(target: Arc<dyn ProbeTarget>, interval: Duration) -> HealthProbeHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    run_once(target.as_ref()).await;
                }
                _ = &mut shutdown_rx => {
                    tracing::info!("health probe task shutting down");
                    break;
                }
            }
        }
    });

    HealthProbeHandle {
        shutdown_tx: Some(shutdown_tx),
        join,
    }
}

/// Runs a single probe pass over every due provider. Exposed standalone so tests
/// can drive one pass without waiting on the interval ticker.
pub async fn run_once(target: &dyn ProbeTarget) {
    for provider_id in target.providers_due_for_probe().await {
        let (reachable, latency_ms) = target.probe_provider(&provider_id, DEFAULT_PROBE_TIMEOUT).await;
        target.apply_probe_result(&provider_id, reachable, latency_ms).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_is_always_unhealthy() {
        assert_eq!(classify(false, None), HealthStatus::Unhealthy);
        assert_eq!(classify(false, Some(50)), HealthStatus::Unhealthy);
    }

    #[test]
    fn fast_reachable_is_healthy() {
        assert_eq!(classify(true, Some(1999)), HealthStatus::Healthy);
        assert_eq!(classify(true, None), HealthStatus::Healthy);
    }

    #[test]
    fn slow_reachable_is_degraded() {
        assert_eq!(classify(true, Some(2000)), HealthStatus::Degraded);
        assert_eq!(classify(true, Some(9000)), HealthStatus::Degraded);
    }

    #[test]
    fn auto_disable_triggers_at_five_consecutive() {
        assert!(!should_auto_disable(4));
        assert!(should_auto_disable(5));
        assert!(should_auto_disable(6));
    }
}
