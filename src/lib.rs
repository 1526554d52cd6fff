//! # AI Provider Gateway Core
//!
//! A multi-tenant routing and execution core for chat-completion requests across
//! heterogeneous upstream providers. The crate is a library with no HTTP ingress
//! and no persistence of its own: callers supply a [`repository::ProviderRepository`]
//! and drive everything through [`GatewayCore`].
//!
//! ## Overview
//!
//! [`GatewayCore`] wires together the nine components that do the actual work:
//!
//! - **Registry** — provider CRUD, credential sealing, adapter cache lifecycle.
//! - **Router** — scores and orders candidates for a request (§4.7).
//! - **Executor** — walks the ordered candidates, retrying and falling back (§4.8).
//! - **CircuitBreaker** / **RateLimiter** — per-provider gating, process-local.
//! - **MetricsRecorder** — EMA latency, daily usage, rolling success rate.
//! - **HealthProbe** — a background task that periodically reclassifies reachability.
//! - **EventBus** — a broadcast channel of lifecycle and execution events.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ai_gateway_core::{GatewayConfig, GatewayCore, InvokeRequest, Message};
//! use ai_gateway_core::repository::InMemoryProviderRepository;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::default();
//! let repository = Arc::new(InMemoryProviderRepository::new());
//! let gateway = GatewayCore::new(config, repository)?;
//!
//! let request = InvokeRequest::new(vec![Message::user("Hello, world!")]);
//! let result = gateway.execute("tenant-1", request, None).await?;
//! println!("{}", result.result.content);
//!
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod health_probe;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod rate_limiter;
pub mod registry;
pub mod repository;
pub mod routing;
pub mod telemetry;
pub mod vault;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::BoxStream;

use circuit_breaker::CircuitBreaker;
use events::{EventBus, GatewayEvent, TimestampedEvent};
use executor::{CandidateContext, ExecutionResult, Executor};
use health_probe::{HealthProbeHandle, ProbeTarget};
use metrics::MetricsRecorder;
use provider::Provider;
use rate_limiter::RateLimiter;
use registry::Registry;
use repository::ProviderRepository;
use routing::{Candidate, Router, RoutingInput};
use vault::CredentialVault;

pub use config::GatewayConfig;
pub use error::{GatewayError, ProviderError};
pub use models::{InvokeRequest, InvokeResult, Message, Role, StreamChunk, Tool, Usage};
pub use provider::{Capability, Dialect, HealthStatus};
pub use registry::NewProvider;
pub use routing::{RoutingPreferences, Strategy as RoutingStrategy};

/// A single streamed completion in progress. `provider_id` names the candidate the
/// router ultimately picked; `stream` yields incremental [`StreamChunk`]s and
/// records the terminal outcome (success/failure, latency) against the breaker and
/// metrics recorder as a side effect of being fully drained or dropped early.
pub struct StreamedExecution {
    pub provider_id: String,
    pub stream: BoxStream<'static, Result<StreamChunk, ProviderError>>,
}

/// The assembled gateway: owns every component's shared state and exposes the
/// transport-agnostic `execute`/`execute_stream` entry points (§6). Construction
/// spawns the health-probe background task; callers that care about a clean
/// shutdown should call [`GatewayCore::shutdown`] before dropping it.
pub struct GatewayCore {
    registry: Arc<Registry>,
    router: Arc<Router>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsRecorder>,
    events: EventBus,
    default_timeout: std::time::Duration,
    self_hosted_timeout: std::time::Duration,
    probe_handle: Option<HealthProbeHandle>,
}

impl GatewayCore {
    /// Builds every component from `config`, wires the registry to `repository`,
    /// and spawns the periodic health-probe task at `config.health_probe_interval`.
    pub fn new(config: GatewayConfig, repository: Arc<dyn ProviderRepository>) -> Result<Self, GatewayError> {
        config.validate()?;

        let vault = Arc::new(CredentialVault::new(config.encryption_key.as_deref()));
        let events = EventBus::new();
        let breaker = Arc::new(CircuitBreaker::new());
        let limiter = Arc::new(RateLimiter::new());
        let metrics = Arc::new(MetricsRecorder::new());
        let router = Arc::new(Router::new());

        let registry = Arc::new(Registry::new(
            repository,
            vault,
            events.clone(),
            breaker.clone(),
            limiter.clone(),
            metrics.clone(),
            router.clone(),
            config.default_timeout,
            config.self_hosted_timeout,
        ));

        let probe_target: Arc<dyn ProbeTarget> = registry.clone();
        let probe_handle = health_probe::spawn(probe_target, config.health_probe_interval);

        Ok(Self {
            registry,
            router,
            breaker,
            limiter,
            metrics,
            events,
            default_timeout: config.default_timeout,
            self_hosted_timeout: config.self_hosted_timeout,
            probe_handle: Some(probe_handle),
        })
    }

    /// Stops the background health-probe task and waits for it to exit. Safe to
    /// call at most once; a second call is a no-op.
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.probe_handle.take() {
            handle.stop().await;
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<TimestampedEvent> {
        self.events.subscribe()
    }

    pub async fn create_provider(&self, new: NewProvider) -> Result<Provider, GatewayError> {
        self.registry.create(new).await
    }

    pub async fn get_provider(&self, tenant_id: &str, provider_id: &str) -> Result<Option<Provider>, GatewayError> {
        self.registry.get(tenant_id, provider_id).await
    }

    pub async fn list_providers(&self, tenant_id: &str) -> Result<Vec<Provider>, GatewayError> {
        self.registry.list(tenant_id).await
    }

    pub async fn delete_provider(&self, tenant_id: &str, provider_id: &str) -> Result<(), GatewayError> {
        self.registry.delete(tenant_id, provider_id).await
    }

    /// Builds the routing candidate list for `tenant_id` (§4.7 steps 1-9):
    /// fetches active, eligible providers, peeks (without consuming) whether the
    /// breaker/limiter would currently admit each, resolves `known_models` only
    /// when the caller requested a specific model, and hands the rest to the
    /// router's scoring pass.
    async fn candidates_for(
        &self,
        tenant_id: &str,
        prefs: &RoutingPreferences,
    ) -> Result<(Vec<Provider>, Vec<Candidate>), GatewayError> {
        let providers: Vec<Provider> = self
            .registry
            .list(tenant_id)
            .await?
            .into_iter()
            .filter(Provider::eligible_for_routing)
            .collect();

        let mut known_models: HashMap<String, Vec<String>> = HashMap::new();
        if prefs.requested_model.is_some() {
            for provider in &providers {
                if let Some(invoker) = self.registry.invoker_for(&provider.id) {
                    if let Ok(models) = invoker.list_models().await {
                        known_models.insert(provider.id.clone(), models);
                    }
                }
            }
        }

        let now = Utc::now();
        let empty: Vec<String> = Vec::new();
        let inputs: Vec<RoutingInput<'_>> = providers
            .iter()
            .map(|provider| RoutingInput {
                provider,
                known_models: known_models.get(&provider.id).unwrap_or(&empty),
                breaker_allows: self.breaker.would_allow_at(&provider.id, now),
                limiter_allows: self.limiter.would_allow_at(&provider.id, provider.rate_limit_per_minute, now),
            })
            .collect();

        let candidates = self.router.select_candidates(tenant_id, inputs, prefs);
        Ok((providers, candidates))
    }

    fn deadline_for(&self, dialect: Dialect) -> std::time::Duration {
        if dialect.is_self_hosted() {
            self.self_hosted_timeout
        } else {
            self.default_timeout
        }
    }

    /// Transport-agnostic entry point (§6). Routes `request` for `tenant_id`
    /// through the scored candidate list and executes it with retry/fallback.
    pub async fn execute(
        &self,
        tenant_id: &str,
        request: InvokeRequest,
        preferences: Option<RoutingPreferences>,
    ) -> Result<ExecutionResult, GatewayError> {
        let prefs = preferences.unwrap_or_default();
        let (providers, candidates) = self.candidates_for(tenant_id, &prefs).await?;

        if candidates.is_empty() {
            return Err(GatewayError::AllProvidersFailed {
                last_error_kind: "NoEligibleProvider".to_string(),
                attempts: 0,
            });
        }

        let providers_by_id: HashMap<&str, &Provider> =
            providers.iter().map(|p| (p.id.as_str(), p)).collect();
        let enable_fallback = prefs.enable_fallback.unwrap_or(true);

        let executor = Executor::new(&self.breaker, &self.limiter, &self.metrics, &self.events);
        let result = executor
            .execute(
                tenant_id,
                &candidates,
                |provider_id| {
                    let provider = *providers_by_id.get(provider_id)?;
                    let invoker = self.registry.invoker_for(provider_id)?;
                    Some(CandidateContext {
                        provider_id,
                        invoker,
                        cost_per_token: provider.cost_per_token,
                        rate_limit: provider.rate_limit_per_minute,
                        deadline: self.deadline_for(provider.dialect),
                    })
                },
                &request,
                prefs.max_retries,
                enable_fallback,
            )
            .await?;

        Ok(result)
    }

    /// Streaming variant of [`Self::execute`]: selects exactly one candidate
    /// (streaming calls aren't retried mid-stream — a failure here falls through
    /// to the next candidate, but once a stream has started emitting chunks it is
    /// handed to the caller as-is) and records the terminal outcome once the
    /// returned stream is drained.
    pub async fn execute_stream(
        &self,
        tenant_id: &str,
        request: InvokeRequest,
        preferences: Option<RoutingPreferences>,
    ) -> Result<StreamedExecution, GatewayError> {
        let prefs = preferences.unwrap_or_default();
        let (providers, candidates) = self.candidates_for(tenant_id, &prefs).await?;
        let providers_by_id: HashMap<&str, &Provider> =
            providers.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut last_error_kind = "NoEligibleProvider".to_string();
        let mut attempts = 0u32;

        for candidate in &candidates {
            let Some(provider) = providers_by_id.get(candidate.provider_id.as_str()) else {
                continue;
            };
            let Some(invoker) = self.registry.invoker_for(&candidate.provider_id) else {
                continue;
            };

            if !self.breaker.allow(&candidate.provider_id) {
                last_error_kind = "CircuitOpen".to_string();
                self.events.publish(GatewayEvent::ExecutionFailed {
                    provider_id: candidate.provider_id.clone(),
                    tenant_id: tenant_id.to_string(),
                    error_kind: last_error_kind.clone(),
                });
                continue;
            }
            if !self.limiter.allow(&candidate.provider_id, provider.rate_limit_per_minute) {
                last_error_kind = "RateLimited".to_string();
                self.events.publish(GatewayEvent::ExecutionFailed {
                    provider_id: candidate.provider_id.clone(),
                    tenant_id: tenant_id.to_string(),
                    error_kind: last_error_kind.clone(),
                });
                continue;
            }

            attempts += 1;
            let deadline = self.deadline_for(provider.dialect);
            let started = std::time::Instant::now();

            match tokio::time::timeout(deadline, invoker.invoke_stream(&request)).await {
                Ok(Ok(stream)) => {
                    return Ok(StreamedExecution {
                        provider_id: candidate.provider_id.clone(),
                        stream: wrap_with_terminal_recording(
                            stream,
                            self.breaker.clone(),
                            self.metrics.clone(),
                            self.events.clone(),
                            tenant_id.to_string(),
                            candidate.provider_id.clone(),
                            started,
                        ),
                    });
                }
                Ok(Err(e)) => {
                    last_error_kind = e.kind_tag().to_string();
                    self.breaker.record_failure(&candidate.provider_id);
                    self.metrics.record(
                        &candidate.provider_id,
                        &metrics::RequestOutcome {
                            success: false,
                            duration_ms: started.elapsed().as_millis() as u64,
                            tokens_used: 0,
                            estimated_cost: 0.0,
                            error_kind: Some(last_error_kind.clone()),
                        },
                    );
                    self.events.publish(GatewayEvent::ExecutionFailed {
                        provider_id: candidate.provider_id.clone(),
                        tenant_id: tenant_id.to_string(),
                        error_kind: last_error_kind.clone(),
                    });
                }
                Err(_) => {
                    last_error_kind = "Timeout".to_string();
                    self.breaker.record_failure(&candidate.provider_id);
                    self.events.publish(GatewayEvent::ExecutionFailed {
                        provider_id: candidate.provider_id.clone(),
                        tenant_id: tenant_id.to_string(),
                        error_kind: last_error_kind.clone(),
                    });
                }
            }
        }

        self.events.publish(GatewayEvent::AllProvidersFailed {
            tenant_id: tenant_id.to_string(),
            attempts,
            last_error_kind: last_error_kind.clone(),
        });

        Err(GatewayError::AllProvidersFailed {
            last_error_kind,
            attempts,
        })
    }
}

/// Wraps an adapter's raw chunk stream so the terminal outcome (success once
/// `finished` is seen, failure if the stream errors first) is recorded against
/// the breaker and metrics recorder exactly once, mirroring the non-streaming
/// executor's bookkeeping without re-running retry/fallback mid-stream.
fn wrap_with_terminal_recording(
    mut inner: BoxStream<'static, Result<StreamChunk, ProviderError>>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsRecorder>,
    events: EventBus,
    tenant_id: String,
    provider_id: String,
    started: std::time::Instant,
) -> BoxStream<'static, Result<StreamChunk, ProviderError>> {
    use futures::StreamExt;

    Box::pin(async_stream::stream! {
        let mut recorded = false;
        while let Some(item) = inner.next().await {
            match &item {
                Ok(chunk) if chunk.finished => {
                    breaker.record_success(&provider_id);
                    let duration_ms = started.elapsed().as_millis() as u64;
                    metrics.record(
                        &provider_id,
                        &metrics::RequestOutcome {
                            success: true,
                            duration_ms,
                            tokens_used: 0,
                            estimated_cost: 0.0,
                            error_kind: None,
                        },
                    );
                    events.publish(GatewayEvent::ExecutionSucceeded {
                        provider_id: provider_id.clone(),
                        tenant_id: tenant_id.clone(),
                        duration_ms,
                    });
                    recorded = true;
                }
                Err(e) => {
                    breaker.record_failure(&provider_id);
                    let error_kind = e.kind_tag().to_string();
                    metrics.record(
                        &provider_id,
                        &metrics::RequestOutcome {
                            success: false,
                            duration_ms: started.elapsed().as_millis() as u64,
                            tokens_used: 0,
                            estimated_cost: 0.0,
                            error_kind: Some(error_kind.clone()),
                        },
                    );
                    events.publish(GatewayEvent::ExecutionFailed {
                        provider_id: provider_id.clone(),
                        tenant_id: tenant_id.clone(),
                        error_kind,
                    });
                    recorded = true;
                }
                Ok(_) => {}
            }
            yield item;
        }
        let _ = recorded;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use repository::InMemoryProviderRepository;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            health_probe_interval: std::time::Duration::from_secs(3600),
            ..GatewayConfig::default()
        }
    }

    #[tokio::test]
    async fn execute_with_no_providers_fails_fast() {
        let repository = Arc::new(InMemoryProviderRepository::new());
        let mut gateway = GatewayCore::new(test_config(), repository).unwrap();

        let request = InvokeRequest::new(vec![Message::user("hi")]);
        let err = gateway.execute("tenant-1", request, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::AllProvidersFailed { .. }));

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn create_then_list_round_trips_through_the_facade() {
        let repository = Arc::new(InMemoryProviderRepository::new());
        let mut gateway = GatewayCore::new(test_config(), repository).unwrap();

        let created = gateway
            .create_provider(NewProvider {
                tenant_id: "tenant-1".to_string(),
                owner_user_id: "user-1".to_string(),
                display_name: "primary".to_string(),
                dialect: Dialect::VendorA,
                base_url: Some("https://example.invalid".to_string()),
                credential: "sk-test".to_string(),
                config_json: "{}".to_string(),
                capabilities: std::collections::HashSet::from([Capability::Chat]),
                priority: 50,
                rate_limit_per_minute: None,
                cost_per_token: None,
            })
            .await
            .unwrap();

        let listed = gateway.list_providers("tenant-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);

        gateway.shutdown().await;
    }
}
