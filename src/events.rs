//! # Events
//!
//! The typed lifecycle/execution event channel any number of observers can
//! subscribe to (spec §6). Backed by [`tokio::sync::broadcast`]: a slow or absent
//! subscriber never blocks the registry/executor, it just misses events once its
//! buffer lags.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    ProviderCreated { provider_id: String, tenant_id: String },
    ProviderUpdated { provider_id: String, tenant_id: String },
    ProviderDeleted { provider_id: String, tenant_id: String },
    ProviderDisabled { provider_id: String, tenant_id: String, reason: String },
    HealthChanged { provider_id: String, tenant_id: String, status: &'static str },
    ExecutionSucceeded { provider_id: String, tenant_id: String, duration_ms: u64 },
    ExecutionFailed { provider_id: String, tenant_id: String, error_kind: String },
    AllProvidersFailed { tenant_id: String, attempts: u32, last_error_kind: String },
}

#[derive(Debug, Clone)]
pub struct TimestampedEvent {
    pub at: DateTime<Utc>,
    pub event: GatewayEvent,
}

/// Owns the broadcast sender; cloning an [`EventBus`] shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TimestampedEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Errors only when there are zero subscribers, which is
    /// an expected and silent no-op — nobody is listening, not a failure.
    pub fn publish(&self, event: GatewayEvent) {
        let _ = self.tx.send(TimestampedEvent {
            at: Utc::now(),
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(GatewayEvent::ProviderCreated {
            provider_id: "p1".to_string(),
            tenant_id: "t1".to_string(),
        });
        let received = rx.recv().await.unwrap();
        assert!(matches!(received.event, GatewayEvent::ProviderCreated { .. }));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(GatewayEvent::ProviderDeleted {
            provider_id: "p1".to_string(),
            tenant_id: "t1".to_string(),
        });
    }
}
