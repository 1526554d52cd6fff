//! Generative-content-shaped dialect strategy (vendor-C). `POST
//! {base}/models/{model}:generateContent` with an API-key header, `contents[]`
//! holding `{role, parts: [{text}]}`, `assistant` remapped to `"model"` (this
//! dialect has no assistant/model distinction the uniform shape needs to hide),
//! and no native system role — folded into the content stream as `"user"`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::adapters::http::{AdapterHttp, AuthStrategy};
use crate::adapters::{degrade_to_single_chunk, Invoker};
use crate::error::ProviderError;
use crate::models::{InvokeRequest, InvokeResult, Message, Role, StreamChunk, Usage};

#[derive(Serialize)]
struct WirePart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct WireContent<'a> {
    role: &'a str,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize, Default)]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    contents: Vec<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "generationConfig")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Deserialize)]
struct WireResponse {
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireCandidate {
    content: WireCandidateContent,
}

#[derive(Deserialize)]
struct WireCandidateContent {
    parts: Vec<WireResponsePart>,
}

#[derive(Deserialize)]
struct WireResponsePart {
    text: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

fn dialect_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    }
}

fn to_wire_contents(messages: &[Message]) -> Vec<WireContent<'_>> {
    messages
        .iter()
        .map(|m| WireContent {
            role: dialect_role(m.role),
            parts: vec![WirePart { text: &m.content }],
        })
        .collect()
}

pub struct GenerativeContentShapedInvoker {
    http: AdapterHttp,
    default_model: Option<String>,
    known_models: Vec<String>,
}

impl GenerativeContentShapedInvoker {
    pub fn new(
        base_url: impl Into<String>,
        api_key: &str,
        extra_headers: &HashMap<String, String>,
        default_model: Option<String>,
        known_models: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = AdapterHttp::new(
            timeout,
            base_url,
            extra_headers,
            AuthStrategy::Header {
                name: "x-goog-api-key".to_string(),
                value: api_key.to_string(),
            },
        )?;
        Ok(Self {
            http,
            default_model,
            known_models,
        })
    }
}

#[async_trait]
impl Invoker for GenerativeContentShapedInvoker {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResult, ProviderError> {
        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .unwrap_or_default();

        let wire = WireRequest {
            contents: to_wire_contents(&request.messages),
            generation_config: Some(WireGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            }),
        };

        let path = format!("/models/{model}:generateContent");
        let resp: WireResponse = self.http.post_json(&path, &wire).await?;

        let content = resp
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();

        Ok(InvokeResult {
            content,
            usage: resp.usage_metadata.map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
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
        Ok(self.known_models.clone())
    }
}
