//! # Provider Data Model
//!
//! The tenant-scoped configuration record described by invariants P1-P6: every
//! upstream chat service instance the registry knows about, its dialect, its
//! capability set, and the rolling operational state the router reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The wire shape a provider speaks. Tagged variants rather than per-vendor
/// subclasses: construction is a pure function of `(dialect, endpoint, credentials,
/// config)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    VendorA,
    VendorB,
    VendorC,
    VendorD,
    VendorE,
    VendorF,
    Aggregator,
    SelfHostedA,
    SelfHostedB,
    Custom,
}

impl Dialect {
    /// Which [`crate::adapters`] strategy implements this dialect tag.
    pub fn strategy(&self) -> DialectStrategy {
        match self {
            Dialect::VendorA
            | Dialect::VendorD
            | Dialect::VendorE
            | Dialect::VendorF
            | Dialect::Aggregator
            | Dialect::SelfHostedB => DialectStrategy::OpenAiShaped,
            Dialect::VendorB => DialectStrategy::MessagesShaped,
            Dialect::VendorC => DialectStrategy::GenerativeContentShaped,
            Dialect::SelfHostedA => DialectStrategy::SelfHostedChat,
            Dialect::Custom => DialectStrategy::Custom,
        }
    }

    /// Whether this dialect gets the longer 60s per-call deadline (§5).
    pub fn is_self_hosted(&self) -> bool {
        matches!(self, Dialect::SelfHostedA | Dialect::SelfHostedB)
    }
}

/// The adapter implementation strategy a [`Dialect`] resolves to. Several dialect
/// tags share one strategy, differing only in base URL / auth header convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectStrategy {
    OpenAiShaped,
    MessagesShaped,
    GenerativeContentShaped,
    SelfHostedChat,
    Custom,
}

/// A capability a provider may advertise. The router filters candidates against
/// `requireCapabilities` from the caller's preferences.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Completion,
    Embedding,
    FunctionCalling,
    Vision,
}

/// Provider health classification, written exclusively by [`crate::health_probe`]
/// and read by [`crate::routing`]. Per P3, UNHEALTHY providers are excluded from new
/// traffic but remain probe targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

/// Circuit breaker state, owned exclusively by [`crate::circuit_breaker`]. Exposed
/// here only for the router/repository to read a snapshot; writes always go
/// through the breaker's `allow`/`record_success`/`record_failure`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Rolling aggregates. [`crate::metrics::MetricsRecorder`] is the system of record;
/// [`crate::registry::Registry::get`]/`list` overlay its live counters onto this
/// struct on every read (P6), which is what feeds the router's scoring function —
/// these fields are never persisted back to the repository, so a snapshot taken
/// straight from storage (bypassing the registry) would see stale defaults here.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderAggregates {
    pub total_requests: u64,
    pub total_errors: u64,
    /// `(totalRequests - totalErrors) / totalRequests`, `None` when `totalRequests == 0` (P6).
    pub success_rate: Option<f64>,
    pub avg_response_time_ms: Option<f64>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

/// A tenant-scoped provider record (spec §3). `credential_blob` and `config_blob`
/// hold vault-sealed ciphertext; plaintext only ever exists transiently inside the
/// registry at adapter-construction time (P5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub tenant_id: String,
    pub owner_user_id: String,
    pub display_name: String,
    pub dialect: Dialect,
    pub base_url: Option<String>,
    pub sealed_credential: String,
    pub sealed_config: String,
    pub capabilities: HashSet<Capability>,
    pub priority: u8,
    pub rate_limit_per_minute: Option<u32>,
    pub cost_per_token: Option<f64>,
    pub active: bool,
    pub health: HealthStatus,
    pub circuit_state: CircuitState,
    pub aggregates: ProviderAggregates,
    pub consecutive_unhealthy: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    /// Free-form adapter config, decoded from JSON once the vault opens
    /// `sealed_config`. Adapters read transform descriptors (custom dialect) from
    /// here.
    pub fn config_map(plaintext_config: &str) -> HashMap<String, serde_json::Value> {
        serde_json::from_str(plaintext_config).unwrap_or_default()
    }

    /// Whether the router may consider this provider for new traffic (P2, P3).
    pub fn eligible_for_routing(&self) -> bool {
        self.active && self.health != HealthStatus::Unhealthy
    }
}
