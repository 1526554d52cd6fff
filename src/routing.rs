//! # Router
//!
//! Candidate selection and scoring (spec §4.7). Produces an ordered candidate list
//! for the [`crate::executor::Executor`] to walk; does not itself make any upstream
//! call.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::provider::{Capability, HealthStatus, Provider};

/// The caller-selected weighting of the scoring function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Cost,
    Latency,
    Quality,
    Balanced,
}

/// Routing preferences supplied alongside a request.
#[derive(Debug, Clone, Default)]
pub struct RoutingPreferences {
    pub preferred_provider_id: Option<String>,
    pub max_cost_per_token: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub require_capabilities: Vec<Capability>,
    pub strategy: Option<Strategy>,
    pub enable_fallback: Option<bool>,
    pub max_retries: Option<u32>,
    pub requested_model: Option<String>,
    pub has_tools: bool,
}

/// One entry of the ordered list the router hands to the executor.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider_id: String,
    pub score: f64,
}

fn latency_score(avg_response_time_ms: Option<f64>) -> f64 {
    match avg_response_time_ms {
        None => 50.0,
        Some(ms) if ms <= 500.0 => 100.0,
        Some(ms) if ms <= 1000.0 => 80.0,
        Some(ms) if ms <= 2000.0 => 60.0,
        Some(ms) if ms <= 5000.0 => 40.0,
        Some(ms) if ms <= 10000.0 => 20.0,
        Some(_) => 10.0,
    }
}

fn cost_score(cost_per_token: Option<f64>) -> f64 {
    match cost_per_token {
        None => 50.0,
        Some(c) if c <= 1e-4 => 100.0,
        Some(c) if c <= 5e-4 => 80.0,
        Some(c) if c <= 1e-3 => 60.0,
        Some(c) if c <= 5e-3 => 40.0,
        Some(c) if c <= 1e-2 => 20.0,
        Some(_) => 10.0,
    }
}

fn reliability_score(success_rate: Option<f64>) -> f64 {
    success_rate.map(|r| r * 100.0).unwrap_or(50.0)
}

fn health_score(health: HealthStatus) -> f64 {
    match health {
        HealthStatus::Healthy => 100.0,
        HealthStatus::Degraded => 60.0,
        HealthStatus::Unhealthy => 20.0,
        HealthStatus::Unknown => 50.0,
    }
}

/// `availability` and `load` are not separately modeled entities in this crate;
/// availability reduces to "is the candidate still in the filtered set" (1.0 for
/// every scored candidate, since unavailable ones were already dropped in step 6),
/// and `load` reduces to the reliability score, matching the corpus's own
/// `ProviderStats` rolling-average-as-proxy-for-load convention.
fn score(
    avg_response_time_ms: Option<f64>,
    cost_per_token: Option<f64>,
    success_rate: Option<f64>,
    health: HealthStatus,
    priority: u8,
    strategy: Strategy,
    model_supported: bool,
    tools_requested_and_supported: bool,
) -> f64 {
    let latency = latency_score(avg_response_time_ms);
    let cost = cost_score(cost_per_token);
    let reliability = reliability_score(success_rate);
    let health_s = health_score(health);
    let availability = 100.0;
    let load = reliability;

    let base = match strategy {
        Strategy::Cost => 0.6 * cost + 0.2 * reliability + 0.1 * health_s + 0.1 * availability,
        Strategy::Latency => {
            0.6 * latency + 0.2 * reliability + 0.1 * health_s + 0.1 * availability
        }
        Strategy::Quality => 0.5 * reliability + 0.3 * health_s + 0.1 * latency + 0.1 * availability,
        Strategy::Balanced => {
            0.25 * latency
                + 0.2 * cost
                + 0.25 * reliability
                + 0.15 * health_s
                + 0.1 * availability
                + 0.05 * load
        }
    };

    let priority_bonus = priority as f64 / 10.0;
    let model_bonus = if model_supported { 5.0 } else { 0.0 };
    let tools_bonus = if tools_requested_and_supported { 3.0 } else { 0.0 };

    (base + priority_bonus + model_bonus + tools_bonus).min(100.0)
}

/// Snapshot of the per-provider state the router needs to score a candidate,
/// decoupled from the full [`Provider`] record so tests can construct it directly.
pub struct RoutingInput<'a> {
    pub provider: &'a Provider,
    pub known_models: &'a [String],
    pub breaker_allows: bool,
    pub limiter_allows: bool,
}

struct CachedList {
    computed_at: Instant,
    candidates: Vec<Candidate>,
}

const CACHE_TTL: Duration = Duration::from_secs(30);

/// Scores and orders candidates per spec §4.7. Memoizes the scored list per
/// `(tenant_id, preferences-hash)` for up to 30s; the registry invalidates this
/// cache eagerly on any provider mutation for the tenant.
#[derive(Default)]
pub struct Router {
    cache: DashMap<(String, u64), CachedList>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate_tenant(&self, tenant_id: &str) {
        self.cache.retain(|(tid, _), _| tid != tenant_id);
    }

    fn preferences_hash(prefs: &RoutingPreferences) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        #[derive(Hash)]
        struct Key<'a> {
            preferred: &'a Option<String>,
            max_cost: Option<u64>,
            max_latency: Option<u64>,
            caps: Vec<&'a str>,
            strategy: Option<u8>,
            model: &'a Option<String>,
        }

        let key = Key {
            preferred: &prefs.preferred_provider_id,
            max_cost: prefs.max_cost_per_token.map(|c| c.to_bits()),
            max_latency: prefs.max_latency_ms.map(|c| c.to_bits()),
            caps: {
                let mut c: Vec<&str> = prefs.require_capabilities.iter().map(|c| c.tag()).collect();
                c.sort_unstable();
                c
            },
            strategy: prefs.strategy.map(|s| s as u8),
            model: &prefs.requested_model,
        };

        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Steps 1-9 of spec §4.7. `inputs` is assumed already filtered to active,
    /// non-UNHEALTHY providers for the tenant (step 1); this function performs
    /// steps 2-9.
    pub fn select_candidates(
        &self,
        tenant_id: &str,
        inputs: Vec<RoutingInput<'_>>,
        prefs: &RoutingPreferences,
    ) -> Vec<Candidate> {
        let cache_key = (tenant_id.to_string(), Self::preferences_hash(prefs));
        if let Some(cached) = self.cache.get(&cache_key) {
            if cached.computed_at.elapsed() < CACHE_TTL {
                return cached.candidates.clone();
            }
        }

        let strategy = prefs.strategy.unwrap_or(Strategy::Balanced);

        let mut pinned: Option<Candidate> = None;
        let mut rest: Vec<RoutingInput<'_>> = Vec::with_capacity(inputs.len());

        for input in inputs {
            if Some(&input.provider.id) == prefs.preferred_provider_id.as_ref() && pinned.is_none() {
                pinned = Some(Candidate {
                    provider_id: input.provider.id.clone(),
                    score: f64::MAX,
                });
                continue;
            }
            rest.push(input);
        }

        let mut scored: Vec<(f64, u8, String)> = rest
            .into_iter()
            .filter(|input| {
                prefs
                    .require_capabilities
                    .iter()
                    .all(|c| input.provider.capabilities.contains(c))
            })
            .filter(|input| match (prefs.max_cost_per_token, input.provider.cost_per_token) {
                (Some(max), Some(cost)) => cost <= max,
                _ => true,
            })
            .filter(|input| {
                match (prefs.max_latency_ms, input.provider.aggregates.avg_response_time_ms) {
                    (Some(max), Some(avg)) => avg <= max,
                    _ => true,
                }
            })
            .filter(|input| input.breaker_allows || input.limiter_allows)
            .map(|input| {
                let model_supported = prefs
                    .requested_model
                    .as_ref()
                    .map(|m| input.known_models.iter().any(|known| known == m))
                    .unwrap_or(false);
                let tools_supported = prefs.has_tools
                    && input.provider.capabilities.contains(&Capability::FunctionCalling);

                let s = score(
                    input.provider.aggregates.avg_response_time_ms,
                    input.provider.cost_per_token,
                    input.provider.aggregates.success_rate,
                    input.provider.health,
                    input.provider.priority,
                    strategy,
                    model_supported,
                    tools_supported,
                );

                (s, input.provider.priority, input.provider.id.clone())
            })
            .collect::<Vec<_>>();

        // Sort descending by score; ties broken by higher priority, then by lower
        // id lexicographically (step 8).
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap()
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        let scored: Vec<Candidate> = scored
            .into_iter()
            .map(|(score, _priority, provider_id)| Candidate { provider_id, score })
            .collect();

        let mut result = Vec::with_capacity(scored.len() + 1);
        if let Some(p) = pinned {
            result.push(p);
        }
        result.extend(scored);

        self.cache.insert(
            cache_key,
            CachedList {
                computed_at: Instant::now(),
                candidates: result.clone(),
            },
        );

        result
    }
}

impl Capability {
    fn tag(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Completion => "completion",
            Capability::Embedding => "embedding",
            Capability::FunctionCalling => "function_calling",
            Capability::Vision => "vision",
        }
    }
}

/// Per-provider rolling stats the router consults, updated by
/// [`crate::metrics::MetricsRecorder`]; kept here as a thin read-side view so
/// callers that don't want the full metrics machinery can supply stats directly.
#[derive(Debug, Clone, Default)]
pub struct ProviderStats {
    pub avg_latency_ms: f64,
    pub request_count: u64,
}

impl ProviderStats {
    pub fn update(&mut self, latency_ms: u64) {
        const ALPHA: f64 = 0.1;
        self.avg_latency_ms = if self.request_count == 0 {
            latency_ms as f64
        } else {
            ALPHA * latency_ms as f64 + (1.0 - ALPHA) * self.avg_latency_ms
        };
        self.request_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CircuitState, Dialect, ProviderAggregates};
    use std::collections::HashSet;

    fn provider(id: &str, priority: u8, cost: Option<f64>) -> Provider {
        Provider {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            owner_user_id: "u1".to_string(),
            display_name: id.to_string(),
            dialect: Dialect::VendorA,
            base_url: None,
            sealed_credential: String::new(),
            sealed_config: String::new(),
            capabilities: HashSet::from([Capability::Chat]),
            priority,
            rate_limit_per_minute: None,
            cost_per_token: cost,
            active: true,
            health: HealthStatus::Healthy,
            circuit_state: CircuitState::Closed,
            aggregates: ProviderAggregates {
                success_rate: Some(1.0),
                avg_response_time_ms: Some(200.0),
                ..Default::default()
            },
            consecutive_unhealthy: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn higher_priority_ranks_first_when_otherwise_identical() {
        let router = Router::new();
        let p1 = provider("p1", 80, Some(1e-4));
        let p2 = provider("p2", 10, Some(1e-4));
        let inputs = vec![
            RoutingInput {
                provider: &p1,
                known_models: &[],
                breaker_allows: true,
                limiter_allows: true,
            },
            RoutingInput {
                provider: &p2,
                known_models: &[],
                breaker_allows: true,
                limiter_allows: true,
            },
        ];
        let prefs = RoutingPreferences {
            strategy: Some(Strategy::Balanced),
            ..Default::default()
        };
        let candidates = router.select_candidates("t1", inputs, &prefs);
        assert_eq!(candidates[0].provider_id, "p1");
    }

    #[test]
    fn preferred_provider_is_pinned_first() {
        let router = Router::new();
        let p1 = provider("p1", 10, Some(1e-4));
        let p2 = provider("p2", 90, Some(1e-4));
        let inputs = vec![
            RoutingInput {
                provider: &p1,
                known_models: &[],
                breaker_allows: true,
                limiter_allows: true,
            },
            RoutingInput {
                provider: &p2,
                known_models: &[],
                breaker_allows: true,
                limiter_allows: true,
            },
        ];
        let prefs = RoutingPreferences {
            preferred_provider_id: Some("p1".to_string()),
            strategy: Some(Strategy::Balanced),
            ..Default::default()
        };
        let candidates = router.select_candidates("t1", inputs, &prefs);
        assert_eq!(candidates[0].provider_id, "p1");
    }

    #[test]
    fn cost_cap_filters_out_expensive_providers() {
        let router = Router::new();
        let p1 = provider("p1", 50, Some(2e-3));
        let p2 = provider("p2", 50, Some(5e-4));
        let inputs = vec![
            RoutingInput {
                provider: &p1,
                known_models: &[],
                breaker_allows: true,
                limiter_allows: true,
            },
            RoutingInput {
                provider: &p2,
                known_models: &[],
                breaker_allows: true,
                limiter_allows: true,
            },
        ];
        let prefs = RoutingPreferences {
            max_cost_per_token: Some(1e-3),
            strategy: Some(Strategy::Cost),
            ..Default::default()
        };
        let candidates = router.select_candidates("t1", inputs, &prefs);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].provider_id, "p2");
    }
}
