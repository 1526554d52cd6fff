//! # Registry
//!
//! Provider CRUD plus lifecycle wiring (spec §4.9): sealing credentials on
//! create, rebuilding the cached adapter whenever credentials/endpoint/config
//! change, and evicting every piece of per-provider state (adapter, breaker,
//! limiter, routing cache entries) on delete. Grounded in the corpus's
//! `create_provider`/`create_provider_with_circuit_breaker` factory pattern,
//! generalized from a `match` on a provider name string to a `match` on
//! [`crate::provider::DialectStrategy`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::adapters::custom::{CustomInvoker, CustomRequestFormat, CustomResponseFormat};
use crate::adapters::generative_content_shaped::GenerativeContentShapedInvoker;
use crate::adapters::messages_shaped::MessagesShapedInvoker;
use crate::adapters::openai_shaped::OpenAiShapedInvoker;
use crate::adapters::self_hosted_chat::SelfHostedChatInvoker;
use crate::adapters::Invoker;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::GatewayError;
use crate::events::{EventBus, GatewayEvent};
use crate::health_probe::{classify, should_auto_disable, ProbeTarget};
use crate::metrics::MetricsRecorder;
use crate::provider::{DialectStrategy, HealthStatus, Provider};
use crate::rate_limiter::RateLimiter;
use crate::repository::ProviderRepository;
use crate::routing::Router;
use crate::vault::CredentialVault;

/// Fields a caller supplies to create a provider; credentials/config arrive as
/// plaintext and are sealed by the registry before anything touches storage (P5).
pub struct NewProvider {
    pub tenant_id: String,
    pub owner_user_id: String,
    pub display_name: String,
    pub dialect: crate::provider::Dialect,
    pub base_url: Option<String>,
    pub credential: String,
    pub config_json: String,
    pub capabilities: std::collections::HashSet<crate::provider::Capability>,
    pub priority: u8,
    pub rate_limit_per_minute: Option<u32>,
    pub cost_per_token: Option<f64>,
}

/// Owns the provider table and every piece of per-provider operational state.
pub struct Registry {
    repository: Arc<dyn ProviderRepository>,
    vault: Arc<CredentialVault>,
    events: EventBus,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsRecorder>,
    router: Arc<Router>,
    adapters: DashMap<String, Arc<dyn Invoker>>,
    /// `provider_id -> tenant_id`, since provider ids (UUIDs) are globally unique
    /// but the repository is keyed by `(tenant_id, provider_id)`. Lets the health
    /// probe loop, which only knows a provider id, find its tenant.
    tenant_of: DashMap<String, String>,
    default_timeout: Duration,
    self_hosted_timeout: Duration,
}

impl Registry {
    pub fn new(
        repository: Arc<dyn ProviderRepository>,
        vault: Arc<CredentialVault>,
        events: EventBus,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<MetricsRecorder>,
        router: Arc<Router>,
        default_timeout: Duration,
        self_hosted_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            vault,
            events,
            breaker,
            limiter,
            metrics,
            router,
            adapters: DashMap::new(),
            tenant_of: DashMap::new(),
            default_timeout,
            self_hosted_timeout,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn build_invoker(
        &self,
        provider: &Provider,
        plaintext_credential: &str,
        plaintext_config: &str,
    ) -> Result<Arc<dyn Invoker>, GatewayError> {
        let config_map = Provider::config_map(plaintext_config);
        let extra_headers: HashMap<String, String> = config_map
            .get("headers")
            .and_then(|v| v.as_object())
            .map(|o| {
                o.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let default_model = config_map.get("default_model").and_then(|v| v.as_str()).map(str::to_string);
        let known_models: Vec<String> = config_map
            .get("known_models")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let timeout = if provider.dialect.is_self_hosted() {
            self.self_hosted_timeout
        } else {
            self.default_timeout
        };

        let base_url = provider.base_url.clone().unwrap_or_default();

        let invoker: Arc<dyn Invoker> = match provider.dialect.strategy() {
            DialectStrategy::OpenAiShaped => Arc::new(
                OpenAiShapedInvoker::new(
                    base_url,
                    plaintext_credential,
                    &extra_headers,
                    default_model,
                    known_models,
                    timeout,
                )
                .map_err(|e| GatewayError::Provider {
                    provider_id: provider.id.clone(),
                    source: e,
                })?,
            ),
            DialectStrategy::MessagesShaped => {
                let auth_header = config_map
                    .get("auth_header")
                    .and_then(|v| v.as_str())
                    .unwrap_or("x-api-key")
                    .to_string();
                Arc::new(
                    MessagesShapedInvoker::new(
                        base_url,
                        plaintext_credential,
                        &auth_header,
                        &extra_headers,
                        default_model,
                        known_models,
                        timeout,
                    )
                    .map_err(|e| GatewayError::Provider {
                        provider_id: provider.id.clone(),
                        source: e,
                    })?,
                )
            }
            DialectStrategy::GenerativeContentShaped => Arc::new(
                GenerativeContentShapedInvoker::new(
                    base_url,
                    plaintext_credential,
                    &extra_headers,
                    default_model,
                    known_models,
                    timeout,
                )
                .map_err(|e| GatewayError::Provider {
                    provider_id: provider.id.clone(),
                    source: e,
                })?,
            ),
            DialectStrategy::SelfHostedChat => Arc::new(
                SelfHostedChatInvoker::new(base_url, &extra_headers, default_model, timeout).map_err(|e| {
                    GatewayError::Provider {
                        provider_id: provider.id.clone(),
                        source: e,
                    }
                })?,
            ),
            DialectStrategy::Custom => {
                let chat_endpoint = config_map
                    .get("chat_endpoint")
                    .and_then(|v| v.as_str())
                    .unwrap_or("/chat")
                    .to_string();
                let request_format = match config_map.get("request_format").and_then(|v| v.as_str()) {
                    Some("messages") => CustomRequestFormat::Messages,
                    _ => CustomRequestFormat::OpenAi,
                };
                let response_format = match config_map.get("response_format").and_then(|v| v.as_str()) {
                    Some("messages") => CustomResponseFormat::Messages,
                    Some("openai") => CustomResponseFormat::OpenAi,
                    _ => CustomResponseFormat::Passthrough,
                };
                let auth_header = config_map.get("auth_header").and_then(|v| v.as_str()).map(str::to_string);
                Arc::new(
                    CustomInvoker::new(
                        base_url,
                        chat_endpoint,
                        plaintext_credential,
                        auth_header.as_deref(),
                        &extra_headers,
                        request_format,
                        response_format,
                        default_model,
                        timeout,
                    )
                    .map_err(|e| GatewayError::Provider {
                        provider_id: provider.id.clone(),
                        source: e,
                    })?,
                )
            }
        };

        Ok(invoker)
    }

    pub async fn create(&self, new: NewProvider) -> Result<Provider, GatewayError> {
        let now = Utc::now();
        let provider = Provider {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: new.tenant_id.clone(),
            owner_user_id: new.owner_user_id,
            display_name: new.display_name,
            dialect: new.dialect,
            base_url: new.base_url,
            sealed_credential: self.vault.seal(&new.credential)?,
            sealed_config: self.vault.seal(&new.config_json)?,
            capabilities: new.capabilities,
            priority: new.priority,
            rate_limit_per_minute: new.rate_limit_per_minute,
            cost_per_token: new.cost_per_token,
            active: true,
            health: HealthStatus::Unknown,
            circuit_state: crate::provider::CircuitState::Closed,
            aggregates: Default::default(),
            consecutive_unhealthy: 0,
            created_at: now,
            updated_at: now,
        };

        let invoker = self.build_invoker(&provider, &new.credential, &new.config_json)?;
        self.adapters.insert(provider.id.clone(), invoker);
        self.tenant_of.insert(provider.id.clone(), provider.tenant_id.clone());
        self.repository.insert(provider.clone()).await?;
        self.router.invalidate_tenant(&provider.tenant_id);
        self.events.publish(GatewayEvent::ProviderCreated {
            provider_id: provider.id.clone(),
            tenant_id: provider.tenant_id.clone(),
        });

        Ok(provider)
    }

    /// Rebuilds the cached adapter only when credential/endpoint/config actually
    /// changed, since adapter construction does real work (HTTP client setup).
    pub async fn update(
        &self,
        tenant_id: &str,
        provider_id: &str,
        new_credential: Option<String>,
        new_base_url: Option<Option<String>>,
        new_config_json: Option<String>,
        mutate: impl FnOnce(&mut Provider),
    ) -> Result<Provider, GatewayError> {
        let mut provider = self
            .repository
            .get(tenant_id, provider_id)
            .await?
            .ok_or_else(|| GatewayError::ProviderNotFound {
                provider_id: provider_id.to_string(),
            })?;

        let credential_changed = new_credential.is_some();
        let config_changed = new_config_json.is_some();
        let endpoint_changed = new_base_url.is_some();

        let plaintext_credential = match &new_credential {
            Some(c) => c.clone(),
            None => self.vault.open(&provider.sealed_credential)?,
        };
        let plaintext_config = match &new_config_json {
            Some(c) => c.clone(),
            None => self.vault.open(&provider.sealed_config)?,
        };

        if let Some(c) = new_credential {
            provider.sealed_credential = self.vault.seal(&c)?;
        }
        if let Some(c) = new_config_json {
            provider.sealed_config = self.vault.seal(&c)?;
        }
        if let Some(url) = new_base_url {
            provider.base_url = url;
        }
        mutate(&mut provider);
        provider.updated_at = Utc::now();

        if credential_changed || config_changed || endpoint_changed {
            let invoker = self.build_invoker(&provider, &plaintext_credential, &plaintext_config)?;
            self.adapters.insert(provider.id.clone(), invoker);
        }

        self.repository.update(provider.clone()).await?;
        self.router.invalidate_tenant(tenant_id);
        self.events.publish(GatewayEvent::ProviderUpdated {
            provider_id: provider.id.clone(),
            tenant_id: provider.tenant_id.clone(),
        });

        Ok(provider)
    }

    pub async fn delete(&self, tenant_id: &str, provider_id: &str) -> Result<(), GatewayError> {
        self.repository.delete(tenant_id, provider_id).await?;
        self.adapters.remove(provider_id);
        self.tenant_of.remove(provider_id);
        self.breaker.evict(provider_id);
        self.limiter.evict(provider_id);
        self.metrics.evict(provider_id);
        self.router.invalidate_tenant(tenant_id);
        self.events.publish(GatewayEvent::ProviderDeleted {
            provider_id: provider_id.to_string(),
            tenant_id: tenant_id.to_string(),
        });
        Ok(())
    }

    pub async fn get(&self, tenant_id: &str, provider_id: &str) -> Result<Option<Provider>, GatewayError> {
        let provider = self.repository.get(tenant_id, provider_id).await?;
        Ok(provider.map(|mut p| {
            self.sync_live_aggregates(&mut p);
            p
        }))
    }

    pub async fn list(&self, tenant_id: &str) -> Result<Vec<Provider>, GatewayError> {
        let mut providers = self.repository.list(tenant_id).await?;
        for provider in &mut providers {
            self.sync_live_aggregates(provider);
        }
        Ok(providers)
    }

    /// Overlays `provider.aggregates` with the live view from [`MetricsRecorder`]
    /// (P6; read-through, not persisted back to the repository). This is what
    /// keeps [`crate::routing::Router`]'s scoring fed with current success
    /// rate/latency instead of the `Default::default()` values a provider is
    /// created with — `MetricsRecorder` is the system of record, this struct is a
    /// read-time snapshot of it.
    fn sync_live_aggregates(&self, provider: &mut Provider) {
        provider.aggregates.total_requests = self.metrics.total_requests(&provider.id);
        provider.aggregates.total_errors = self.metrics.total_errors(&provider.id);
        provider.aggregates.success_rate = self.metrics.success_rate(&provider.id);
        provider.aggregates.avg_response_time_ms = self.metrics.avg_latency_ms(&provider.id, Utc::now().date_naive());
        provider.aggregates.last_used_at = self.metrics.last_used_at(&provider.id);
    }

    pub fn invoker_for(&self, provider_id: &str) -> Option<Arc<dyn Invoker>> {
        self.adapters.get(provider_id).map(|e| e.clone())
    }
}

const PROBE_SKIP_WINDOW: chrono::Duration = chrono::Duration::seconds(240);

#[async_trait]
impl ProbeTarget for Registry {
    async fn providers_due_for_probe(&self) -> Vec<String> {
        let mut due = Vec::new();
        let now = Utc::now();
        for entry in self.adapters.iter() {
            let provider_id = entry.key().clone();
            let Some(tenant_id) = self.tenant_of.get(&provider_id).map(|e| e.clone()) else {
                continue;
            };
            let Ok(Some(provider)) = self.repository.get(&tenant_id, &provider_id).await else {
                continue;
            };
            if !provider.active {
                continue;
            }
            let skip = provider
                .aggregates
                .last_health_check_at
                .is_some_and(|last| now - last < PROBE_SKIP_WINDOW);
            if !skip {
                due.push(provider_id);
            }
        }
        due
    }

    async fn probe_provider(&self, provider_id: &str, timeout: Duration) -> (bool, Option<u64>) {
        let Some(invoker) = self.invoker_for(provider_id) else {
            return (false, None);
        };
        match tokio::time::timeout(timeout, invoker.probe()).await {
            Ok((ok, latency)) => (ok, latency),
            Err(_) => (false, Some(timeout.as_millis() as u64)),
        }
    }

    async fn apply_probe_result(&self, provider_id: &str, reachable: bool, latency_ms: Option<u64>) {
        let Some(tenant_id) = self.tenant_of.get(provider_id).map(|e| e.clone()) else {
            return;
        };
        let Ok(Some(mut provider)) = self.repository.get(&tenant_id, provider_id).await else {
            return;
        };

        let status = classify(reachable, latency_ms);
        provider.health = status;
        provider.aggregates.last_health_check_at = Some(Utc::now());
        if status == HealthStatus::Unhealthy {
            provider.consecutive_unhealthy += 1;
        } else {
            provider.consecutive_unhealthy = 0;
        }

        let disable = provider.consecutive_unhealthy > 0 && should_auto_disable(provider.consecutive_unhealthy);
        if disable {
            provider.active = false;
        }

        let _ = self.repository.update(provider).await;
        self.router.invalidate_tenant(&tenant_id);

        self.events.publish(GatewayEvent::HealthChanged {
            provider_id: provider_id.to_string(),
            tenant_id: tenant_id.clone(),
            status: status_tag(status),
        });

        if disable {
            self.events.publish(GatewayEvent::ProviderDisabled {
                provider_id: provider_id.to_string(),
                tenant_id,
                reason: "5 consecutive unhealthy health probes".to_string(),
            });
        }
    }
}

fn status_tag(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Unknown => "unknown",
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
    }
}
