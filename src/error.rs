//! # Error Handling Module
//!
//! Defines the error taxonomy for adapter, routing, and execution failures. Every
//! variant carries enough context to log without leaking credentials or internal
//! URLs, and exposes `is_retryable`/`breaker_should_count` so the executor and router
//! consult one source of truth instead of duplicating classification logic.

use thiserror::Error;

/// Errors surfaced by an individual provider adapter.
///
/// Maps onto the adapter error surface: transport failure, classified upstream 4xx,
/// upstream 5xx, timeout, and decode error. Adapters never retry internally — retry
/// is an [`crate::executor::Executor`] concern.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Underlying transport failure (connection refused, DNS, TLS, etc).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream responded 4xx and the body indicates an authentication problem.
    #[error("upstream authentication error ({code}): {message}")]
    Upstream4xxAuth { code: u16, message: String },

    /// Upstream responded 4xx with a request validation problem.
    #[error("upstream validation error ({code}): {message}")]
    Upstream4xxValidation { code: u16, message: String },

    /// Upstream responded 4xx indicating quota exhaustion.
    #[error("upstream quota error ({code}): {message}")]
    Upstream4xxQuota { code: u16, message: String },

    /// Upstream responded 429 or an equivalent rate-limit 4xx.
    #[error("upstream rate limit ({code}): {message}")]
    Upstream4xxRateLimit { code: u16, message: String },

    /// Upstream responded 4xx with no finer classification available.
    #[error("upstream error ({code}): {message}")]
    Upstream4xxOther { code: u16, message: String },

    /// Upstream responded 5xx.
    #[error("upstream server error ({code}): {message}")]
    Upstream5xx { code: u16, message: String },

    /// The call exceeded its per-call deadline.
    #[error("request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Response body could not be decoded into the expected shape.
    #[error("failed to decode response: {message}")]
    Decode { message: String },
}

impl ProviderError {
    /// Whether this error kind may be retried within the same candidate, per the
    /// error-handling table: rate limits, 5xx, timeouts, and transport errors are
    /// retryable; auth/validation/quota/decode errors are terminal for this candidate.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_)
                | ProviderError::Upstream4xxRateLimit { .. }
                | ProviderError::Upstream5xx { .. }
                | ProviderError::Timeout { .. }
        )
    }

    /// Whether this error kind counts against the circuit breaker's failure count.
    /// `CircuitOpen`/`RateLimited` (local, pre-call denials) never reach this type —
    /// they short-circuit before an adapter call is attempted.
    pub fn breaker_should_count(&self) -> bool {
        true
    }

    /// A short, stable tag used in metrics and event payloads. Never includes the
    /// error message body, which may echo back request content.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            ProviderError::Transport(_) => "Transport",
            ProviderError::Upstream4xxAuth { .. } => "Upstream4xxAuth",
            ProviderError::Upstream4xxValidation { .. } => "Upstream4xxValidation",
            ProviderError::Upstream4xxQuota { .. } => "Upstream4xxQuota",
            ProviderError::Upstream4xxRateLimit { .. } => "Upstream4xxRateLimit",
            ProviderError::Upstream4xxOther { .. } => "Upstream4xxOther",
            ProviderError::Upstream5xx { .. } => "Upstream5xx",
            ProviderError::Timeout { .. } => "Timeout",
            ProviderError::Decode { .. } => "Decode",
        }
    }
}

/// Crate-wide errors: registry/config/execution failures that sit above a single
/// adapter call.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No provider with this id is registered for the tenant.
    #[error("provider not found: {provider_id}")]
    ProviderNotFound { provider_id: String },

    /// The registry or vault was asked to act before it finished initializing.
    #[error("component not initialized: {component}")]
    NotInitialized { component: String },

    /// The breaker denied this candidate; caller should try the next one.
    #[error("circuit open for provider {provider_id}")]
    CircuitOpen { provider_id: String },

    /// The rate limiter denied this candidate; caller should try the next one.
    #[error("rate limited for provider {provider_id}")]
    RateLimited { provider_id: String },

    /// A single adapter call failed; wraps the classified [`ProviderError`].
    #[error("provider {provider_id} call failed: {source}")]
    Provider {
        provider_id: String,
        #[source]
        source: ProviderError,
    },

    /// Every candidate in the fallback chain was exhausted.
    #[error("all providers failed after {attempts} attempt(s), last error: {last_error_kind}")]
    AllProvidersFailed {
        last_error_kind: String,
        attempts: u32,
    },

    /// Invalid or missing configuration.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Vault open/seal failure (corrupt ciphertext, bad key length, etc).
    #[error("credential vault error: {message}")]
    Vault { message: String },

    /// Serialization/deserialization failure outside an adapter call.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether the event trace for this failure should surface credentials or
    /// internal URLs. Always false — callers only ever see the redacted message
    /// produced by `Display`.
    pub fn is_opaque(&self) -> bool {
        true
    }
}
