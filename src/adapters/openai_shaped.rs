//! OpenAI-shaped dialect strategy (vendor-A/D/E/F, aggregator, self-hosted-B).
//! `POST {base}/chat/completions` with a bearer token, OpenAI's
//! `{role, content}` message array and `{choices[0].message, usage}` response.

use std::collections::HashMap;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::adapters::http::{AdapterHttp, AuthStrategy};
use crate::adapters::Invoker;
use crate::error::ProviderError;
use crate::models::{InvokeRequest, InvokeResult, Message, Role, StreamChunk, Usage};

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [serde_json::Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    model: String,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: role_str(m.role),
            content: &m.content,
        })
        .collect()
}

pub struct OpenAiShapedInvoker {
    http: AdapterHttp,
    default_model: Option<String>,
    known_models: Vec<String>,
}

impl OpenAiShapedInvoker {
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
            AuthStrategy::Bearer {
                token: api_key.to_string(),
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
impl Invoker for OpenAiShapedInvoker {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResult, ProviderError> {
        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .unwrap_or_default();

        let wire = WireRequest {
            model: &model,
            messages: to_wire_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: None,
            stream: None,
        };

        let resp: WireResponse = self.http.post_json("/chat/completions", &wire).await?;
        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(InvokeResult {
            content,
            usage: resp.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            model: resp.model,
            degraded_stream: false,
        })
    }

    async fn invoke_stream(
        &self,
        request: &InvokeRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError> {
        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .unwrap_or_default();

        let wire = WireRequest {
            model: &model,
            messages: to_wire_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: None,
            stream: Some(true),
        };

        let response = self.http.post_json_raw("/chat/completions", &wire).await?;
        if !response.status().is_success() {
            return Err(crate::adapters::http::classify_error_response(response).await);
        }

        let stream = Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = futures::StreamExt::next(&mut bytes_stream).await {
                match chunk_result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer.drain(..=line_end);
                            let Some(payload) = line.strip_prefix("data: ") else { continue };
                            if payload == "[DONE]" {
                                yield Ok(StreamChunk { delta: String::new(), finished: true, degraded: false });
                                return;
                            }
                            match serde_json::from_str::<WireStreamChunk>(payload) {
                                Ok(chunk) => {
                                    if let Some(choice) = chunk.choices.into_iter().next() {
                                        let finished = choice.finish_reason.is_some();
                                        yield Ok(StreamChunk {
                                            delta: choice.delta.content.unwrap_or_default(),
                                            finished,
                                            degraded: false,
                                        });
                                    }
                                }
                                Err(_) => continue,
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ProviderError::Transport(e));
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.known_models.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_mapping_covers_all_three_roles() {
        assert_eq!(role_str(Role::System), "system");
        assert_eq!(role_str(Role::User), "user");
        assert_eq!(role_str(Role::Assistant), "assistant");
    }
}
