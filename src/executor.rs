//! # Executor
//!
//! Orchestrates limit checks, breaker checks, the adapter call itself, retries,
//! fallback, and metric recording (spec §4.8). This is the one component that
//! actually drives upstream traffic; [`crate::routing::Router`] only proposes an
//! order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::adapters::Invoker;
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{GatewayError, ProviderError};
use crate::events::{EventBus, GatewayEvent};
use crate::metrics::{MetricsRecorder, RequestOutcome};
use crate::models::{InvokeRequest, InvokeResult};
use crate::rate_limiter::RateLimiter;
use crate::routing::Candidate;

const BACKOFF_SCHEDULE_MS: [u64; 3] = [1000, 2000, 4000];
const MAX_INTERNAL_RETRIES: u32 = 3;

/// A provider's cost-per-token, used for the estimated-cost formula, and its
/// per-call deadline, resolved by dialect. `invoker` is an owned `Arc` rather
/// than a borrow since `resolve` below fetches a fresh clone from the
/// registry's adapter cache on every call.
pub struct CandidateContext<'a> {
    pub provider_id: &'a str,
    pub invoker: Arc<dyn Invoker>,
    pub cost_per_token: Option<f64>,
    pub rate_limit: Option<u32>,
    pub deadline: Duration,
}

/// Execution result annotated per spec §4.8 step 6.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub result: InvokeResult,
    pub duration: Duration,
    pub tokens_used: u64,
    pub estimated_cost: f64,
    pub attempts: u32,
    pub fallback_used: bool,
}

/// Orchestrates a single `Execute` call across the ordered candidate list the
/// router produced.
pub struct Executor<'a> {
    breaker: &'a CircuitBreaker,
    limiter: &'a RateLimiter,
    metrics: &'a MetricsRecorder,
    events: &'a EventBus,
}

impl<'a> Executor<'a> {
    pub fn new(
        breaker: &'a CircuitBreaker,
        limiter: &'a RateLimiter,
        metrics: &'a MetricsRecorder,
        events: &'a EventBus,
    ) -> Self {
        Self {
            breaker,
            limiter,
            metrics,
            events,
        }
    }

    fn estimated_tokens(request: &InvokeRequest) -> u64 {
        let content_chars = request.content_len();
        let max_tokens = request.max_tokens.unwrap_or(0) as u64;
        (content_chars as f64 / 4.0).ceil() as u64 + max_tokens
    }

    fn estimated_cost(request: &InvokeRequest, cost_per_token: Option<f64>, usage_tokens: Option<u64>) -> (u64, f64) {
        let tokens = usage_tokens.unwrap_or_else(|| Self::estimated_tokens(request));
        let cost = cost_per_token.unwrap_or(0.0) * tokens as f64;
        (tokens, cost)
    }

    /// Runs a single candidate's adapter call with the backoff-and-retry rule from
    /// step 5: only retryable error kinds are retried, up to 3 internal attempts,
    /// delays 1s/2s/4s.
    async fn invoke_with_internal_retry(
        candidate: &CandidateContext<'_>,
        request: &InvokeRequest,
    ) -> Result<InvokeResult, ProviderError> {
        let mut last_err: Option<ProviderError> = None;
        for attempt in 0..=MAX_INTERNAL_RETRIES {
            if attempt > 0 {
                let delay_ms = BACKOFF_SCHEDULE_MS[(attempt - 1) as usize];
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let call = candidate.invoker.invoke(request);
            let outcome = timeout(candidate.deadline, call).await;

            match outcome {
                Err(_) => {
                    last_err = Some(ProviderError::Timeout {
                        elapsed_ms: candidate.deadline.as_millis() as u64,
                    });
                }
                Ok(Err(e)) => {
                    let retryable = e.is_retryable();
                    last_err = Some(e);
                    if !retryable {
                        break;
                    }
                }
                Ok(Ok(result)) => return Ok(result),
            }

            if attempt == MAX_INTERNAL_RETRIES {
                break;
            }
            if let Some(e) = &last_err {
                if !e.is_retryable() {
                    break;
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    /// Walks `candidates` in order per §4.8 until success, the list is exhausted,
    /// or `attempts >= max_retries`.
    pub async fn execute(
        &self,
        tenant_id: &str,
        candidates: &[Candidate],
        resolve: impl Fn(&str) -> Option<CandidateContext<'_>>,
        request: &InvokeRequest,
        max_retries: Option<u32>,
        enable_fallback: bool,
    ) -> Result<ExecutionResult, GatewayError> {
        let max_retries = max_retries.unwrap_or(3);
        let mut attempts: u32 = 0;
        let mut last_error_kind = String::new();
        let start = Instant::now();

        for candidate in candidates {
            if attempts >= max_retries {
                break;
            }
            attempts += 1;

            let Some(ctx) = resolve(&candidate.provider_id) else {
                continue;
            };

            if !self.breaker.allow(ctx.provider_id) {
                self.metrics.record(
                    ctx.provider_id,
                    &RequestOutcome {
                        success: false,
                        duration_ms: 0,
                        tokens_used: 0,
                        estimated_cost: 0.0,
                        error_kind: Some("CircuitOpen".to_string()),
                    },
                );
                last_error_kind = "CircuitOpen".to_string();
                self.events.publish(GatewayEvent::ExecutionFailed {
                    provider_id: ctx.provider_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                    error_kind: last_error_kind.clone(),
                });
                if !enable_fallback {
                    break;
                }
                continue;
            }

            if !self.limiter.allow(ctx.provider_id, ctx.rate_limit) {
                self.metrics.record(
                    ctx.provider_id,
                    &RequestOutcome {
                        success: false,
                        duration_ms: 0,
                        tokens_used: 0,
                        estimated_cost: 0.0,
                        error_kind: Some("RateLimited".to_string()),
                    },
                );
                last_error_kind = "RateLimited".to_string();
                self.events.publish(GatewayEvent::ExecutionFailed {
                    provider_id: ctx.provider_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                    error_kind: last_error_kind.clone(),
                });
                if !enable_fallback {
                    break;
                }
                continue;
            }

            let call_start = Instant::now();
            let attempt_result = Self::invoke_with_internal_retry(&ctx, request).await;
            let duration = call_start.elapsed();

            match attempt_result {
                Ok(result) => {
                    let (tokens, cost) = Self::estimated_cost(
                        request,
                        ctx.cost_per_token,
                        result.usage.map(|u| u.total_tokens as u64),
                    );

                    self.breaker.record_success(ctx.provider_id);
                    self.metrics.record(
                        ctx.provider_id,
                        &RequestOutcome {
                            success: true,
                            duration_ms: duration.as_millis() as u64,
                            tokens_used: tokens,
                            estimated_cost: cost,
                            error_kind: None,
                        },
                    );
                    self.events.publish(GatewayEvent::ExecutionSucceeded {
                        provider_id: ctx.provider_id.to_string(),
                        tenant_id: tenant_id.to_string(),
                        duration_ms: duration.as_millis() as u64,
                    });

                    return Ok(ExecutionResult {
                        result,
                        duration: start.elapsed(),
                        tokens_used: tokens,
                        estimated_cost: cost,
                        attempts,
                        fallback_used: attempts > 1,
                    });
                }
                Err(e) => {
                    last_error_kind = e.kind_tag().to_string();
                    self.breaker.record_failure(ctx.provider_id);
                    self.metrics.record(
                        ctx.provider_id,
                        &RequestOutcome {
                            success: false,
                            duration_ms: duration.as_millis() as u64,
                            tokens_used: 0,
                            estimated_cost: 0.0,
                            error_kind: Some(last_error_kind.clone()),
                        },
                    );
                    self.events.publish(GatewayEvent::ExecutionFailed {
                        provider_id: ctx.provider_id.to_string(),
                        tenant_id: tenant_id.to_string(),
                        error_kind: last_error_kind.clone(),
                    });
                    if !enable_fallback {
                        break;
                    }
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

