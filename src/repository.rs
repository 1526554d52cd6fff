//! # ProviderRepository
//!
//! The persistence seam the [`crate::registry::Registry`] reads and writes
//! through (spec §9's multi-process-coordination note: "the repository trait is
//! the seam where a shared-store implementation could replace the in-memory
//! tables"). This crate ships one process-local implementation; a
//! database-backed one can be swapped in without touching the registry.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::GatewayError;
use crate::provider::Provider;

#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn insert(&self, provider: Provider) -> Result<(), GatewayError>;
    async fn update(&self, provider: Provider) -> Result<(), GatewayError>;
    async fn delete(&self, tenant_id: &str, provider_id: &str) -> Result<(), GatewayError>;
    async fn get(&self, tenant_id: &str, provider_id: &str) -> Result<Option<Provider>, GatewayError>;
    async fn list(&self, tenant_id: &str) -> Result<Vec<Provider>, GatewayError>;
}

/// In-memory `ProviderRepository`, keyed by `(tenant_id, provider_id)`. Suitable
/// for tests and single-process deployments; state does not survive a restart.
#[derive(Default)]
pub struct InMemoryProviderRepository {
    providers: DashMap<(String, String), Provider>,
}

impl InMemoryProviderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderRepository for InMemoryProviderRepository {
    async fn insert(&self, provider: Provider) -> Result<(), GatewayError> {
        let key = (provider.tenant_id.clone(), provider.id.clone());
        self.providers.insert(key, provider);
        Ok(())
    }

    async fn update(&self, provider: Provider) -> Result<(), GatewayError> {
        let key = (provider.tenant_id.clone(), provider.id.clone());
        if !self.providers.contains_key(&key) {
            return Err(GatewayError::ProviderNotFound {
                provider_id: provider.id,
            });
        }
        self.providers.insert(key, provider);
        Ok(())
    }

    async fn delete(&self, tenant_id: &str, provider_id: &str) -> Result<(), GatewayError> {
        self.providers
            .remove(&(tenant_id.to_string(), provider_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| GatewayError::ProviderNotFound {
                provider_id: provider_id.to_string(),
            })
    }

    async fn get(&self, tenant_id: &str, provider_id: &str) -> Result<Option<Provider>, GatewayError> {
        Ok(self
            .providers
            .get(&(tenant_id.to_string(), provider_id.to_string()))
            .map(|p| p.clone()))
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<Provider>, GatewayError> {
        Ok(self
            .providers
            .iter()
            .filter(|entry| entry.key().0 == tenant_id)
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Capability, CircuitState, Dialect, HealthStatus, ProviderAggregates};
    use std::collections::HashSet;

    fn sample(id: &str, tenant: &str) -> Provider {
        Provider {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            owner_user_id: "u1".to_string(),
            display_name: id.to_string(),
            dialect: Dialect::VendorA,
            base_url: None,
            sealed_credential: String::new(),
            sealed_config: String::new(),
            capabilities: HashSet::from([Capability::Chat]),
            priority: 50,
            rate_limit_per_minute: None,
            cost_per_token: None,
            active: true,
            health: HealthStatus::Unknown,
            circuit_state: CircuitState::Closed,
            aggregates: ProviderAggregates::default(),
            consecutive_unhealthy: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let repo = InMemoryProviderRepository::new();
        repo.insert(sample("p1", "t1")).await.unwrap();
        let got = repo.get("t1", "p1").await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn list_is_scoped_to_tenant() {
        let repo = InMemoryProviderRepository::new();
        repo.insert(sample("p1", "t1")).await.unwrap();
        repo.insert(sample("p2", "t2")).await.unwrap();
        let listed = repo.list("t1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "p1");
    }

    #[tokio::test]
    async fn delete_missing_provider_fails() {
        let repo = InMemoryProviderRepository::new();
        let err = repo.delete("t1", "nope").await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderNotFound { .. }));
    }

    #[tokio::test]
    async fn update_missing_provider_fails() {
        let repo = InMemoryProviderRepository::new();
        let err = repo.update(sample("p1", "t1")).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderNotFound { .. }));
    }
}
