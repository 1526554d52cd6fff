//! # Adapters
//!
//! One [`Invoker`] implementation per [`crate::provider::DialectStrategy`] (spec §6).
//! The registry resolves a [`crate::provider::Provider`]'s dialect to a strategy and
//! constructs the matching invoker once at provider-create time; the executor only
//! ever talks to the `dyn Invoker` trait object.

pub mod custom;
pub mod generative_content_shaped;
pub mod http;
pub mod messages_shaped;
pub mod openai_shaped;
pub mod self_hosted_chat;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ProviderError;
use crate::models::{InvokeRequest, InvokeResult, StreamChunk};

/// The uniform capability every dialect strategy exposes. Adapters never retry or
/// consult the breaker/limiter themselves — that's the executor's job.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResult, ProviderError>;

    /// Streams incremental chunks. Dialects that can't stream natively degrade to a
    /// single chunk carrying the full response with `finished: true`, and the
    /// wrapping [`InvokeResult::degraded_stream`] flag is set by the caller that
    /// buffers this stream into a result.
    async fn invoke_stream(
        &self,
        request: &InvokeRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError>;

    /// Model ids this adapter instance knows about, for the router's
    /// `requestedModel` capability check. Static list for hosted dialects; a live
    /// call for self-hosted dialects that enumerate what's actually pulled.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    /// Lightweight upstream reachability probe used by [`crate::health_probe`].
    /// Default implementation lists models and folds any error into `false`.
    async fn probe(&self) -> (bool, Option<u64>) {
        let start = std::time::Instant::now();
        let ok = self.list_models().await.is_ok();
        (ok, Some(start.elapsed().as_millis() as u64))
    }
}

/// Wraps a non-streaming [`Invoker::invoke`] call into the single-chunk stream
/// degradation shape dialects without native streaming support use.
pub(crate) fn degrade_to_single_chunk(content: String) -> BoxStream<'static, Result<StreamChunk, ProviderError>> {
    use futures::stream;
    Box::pin(stream::once(async move {
        Ok(StreamChunk {
            delta: content,
            finished: true,
            degraded: true,
        })
    }))
}
