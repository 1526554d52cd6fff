//! Self-hosted-chat dialect strategy (self-hosted-A). No auth, `POST
//! {base}/api/chat` with a flat `{role, content}` message array and a
//! `{message: {content}, prompt_eval_count, eval_count}` response. `list_models`
//! is a live `GET {base}/api/tags` call rather than a static table, since a
//! self-hosted instance's model set is whatever's actually been pulled locally.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::adapters::http::{AdapterHttp, AuthStrategy};
use crate::adapters::{degrade_to_single_chunk, Invoker};
use crate::error::ProviderError;
use crate::models::{InvokeRequest, InvokeResult, Message, Role, StreamChunk, Usage};

#[derive(Deserialize)]
struct WireResponse {
    message: WireResponseMessage,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct WireTagsResponse {
    models: Vec<WireModelEntry>,
}

#[derive(Deserialize)]
struct WireModelEntry {
    name: String,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

pub struct SelfHostedChatInvoker {
    http: AdapterHttp,
    default_model: Option<String>,
}

impl SelfHostedChatInvoker {
    pub fn new(
        base_url: impl Into<String>,
        extra_headers: &HashMap<String, String>,
        default_model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = AdapterHttp::new(timeout, base_url, extra_headers, AuthStrategy::None)?;
        Ok(Self { http, default_model })
    }
}

#[async_trait]
impl Invoker for SelfHostedChatInvoker {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResult, ProviderError> {
        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .unwrap_or_default();

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m: &Message| json!({ "role": role_str(m.role), "content": m.content }))
            .collect();

        let wire = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });

        let resp: WireResponse = self.http.post_json("/api/chat", &wire).await?;

        Ok(InvokeResult {
            content: resp.message.content,
            usage: Some(Usage {
                prompt_tokens: resp.prompt_eval_count,
                completion_tokens: resp.eval_count,
                total_tokens: resp.prompt_eval_count + resp.eval_count,
            }),
            model,
            degraded_stream: false,
        })
    }

    async fn invoke_stream(
        &self,
        request: &InvokeRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError> {
        let result = self.invoke(request).await?;
        Ok(degrade_to_single_chunk(result.content))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let resp: WireTagsResponse = self.http.get_json("/api/tags").await?;
        Ok(resp.models.into_iter().map(|m| m.name).collect())
    }
}
