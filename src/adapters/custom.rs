//! Custom dialect strategy. Unlike the other four, this one has no fixed wire
//! shape — a provider's sealed config carries a transform descriptor (request
//! format, response format, auth style, chat endpoint) decoded by
//! [`crate::provider::Provider::config_map`], and this invoker applies it
//! generically. Includes a best-effort passthrough response extraction the
//! teacher's equivalent provider didn't have, for operators who don't want to
//! hand-write a descriptor for a near-OpenAI-shaped custom backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::json;

use crate::adapters::http::{AdapterHttp, AuthStrategy};
use crate::adapters::{degrade_to_single_chunk, Invoker};
use crate::error::ProviderError;
use crate::models::{InvokeRequest, InvokeResult, Message, Role, StreamChunk, Usage};

/// How the custom invoker shapes the outgoing request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomRequestFormat {
    OpenAi,
    Messages,
}

/// How the custom invoker reads the incoming response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomResponseFormat {
    OpenAi,
    Messages,
    /// No known shape: try `choices[0].message.content`, then `content[0].text`,
    /// then `content`, then `text`, in that order, defaulting to `""`.
    Passthrough,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

pub struct CustomInvoker {
    http: AdapterHttp,
    chat_endpoint: String,
    request_format: CustomRequestFormat,
    response_format: CustomResponseFormat,
    default_model: Option<String>,
}

impl CustomInvoker {
    pub fn new(
        base_url: impl Into<String>,
        chat_endpoint: impl Into<String>,
        api_key: &str,
        auth_header: Option<&str>,
        extra_headers: &HashMap<String, String>,
        request_format: CustomRequestFormat,
        response_format: CustomResponseFormat,
        default_model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let auth = match auth_header {
            Some(name) => AuthStrategy::Header {
                name: name.to_string(),
                value: api_key.to_string(),
            },
            None if api_key.is_empty() => AuthStrategy::None,
            None => AuthStrategy::Bearer {
                token: api_key.to_string(),
            },
        };
        let http = AdapterHttp::new(timeout, base_url, extra_headers, auth)?;
        Ok(Self {
            http,
            chat_endpoint: chat_endpoint.into(),
            request_format,
            response_format,
            default_model,
        })
    }

    fn build_body(&self, request: &InvokeRequest, model: &str) -> serde_json::Value {
        match self.request_format {
            CustomRequestFormat::OpenAi => json!({
                "model": model,
                "messages": request.messages.iter().map(|m: &Message| {
                    json!({ "role": role_str(m.role), "content": m.content })
                }).collect::<Vec<_>>(),
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
            }),
            CustomRequestFormat::Messages => {
                let mut system = String::new();
                let mut messages = Vec::new();
                for m in &request.messages {
                    if m.role == Role::System {
                        if !system.is_empty() {
                            system.push('\n');
                        }
                        system.push_str(&m.content);
                    } else {
                        messages.push(json!({ "role": role_str(m.role), "content": m.content }));
                    }
                }
                json!({
                    "model": model,
                    "system": if system.is_empty() { serde_json::Value::Null } else { json!(system) },
                    "messages": messages,
                    "max_tokens": request.max_tokens.unwrap_or(4096),
                    "temperature": request.temperature,
                })
            }
        }
    }

    fn extract_response(&self, body: &serde_json::Value) -> (String, Option<Usage>) {
        match self.response_format {
            CustomResponseFormat::OpenAi => {
                let content = body["choices"][0]["message"]["content"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let usage = body.get("usage").map(|u| Usage {
                    prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                    completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
                    total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
                });
                (content, usage)
            }
            CustomResponseFormat::Messages => {
                let content = body["content"][0]["text"].as_str().unwrap_or_default().to_string();
                let usage = body.get("usage").map(|u| {
                    let input = u["input_tokens"].as_u64().unwrap_or(0) as u32;
                    let output = u["output_tokens"].as_u64().unwrap_or(0) as u32;
                    Usage {
                        prompt_tokens: input,
                        completion_tokens: output,
                        total_tokens: input + output,
                    }
                });
                (content, usage)
            }
            CustomResponseFormat::Passthrough => {
                let content = body["choices"][0]["message"]["content"]
                    .as_str()
                    .or_else(|| body["content"][0]["text"].as_str())
                    .or_else(|| body["content"].as_str())
                    .or_else(|| body["text"].as_str())
                    .unwrap_or_default()
                    .to_string();
                (content, None)
            }
        }
    }
}

#[async_trait]
impl Invoker for CustomInvoker {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResult, ProviderError> {
        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .unwrap_or_default();

        let body = self.build_body(request, &model);
        let resp: serde_json::Value = self.http.post_json(&self.chat_endpoint, &body).await?;
        let (content, usage) = self.extract_response(&resp);

        Ok(InvokeResult {
            content,
            usage,
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
        Ok(self.default_model.clone().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoker(response_format: CustomResponseFormat) -> CustomInvoker {
        CustomInvoker::new(
            "http://localhost:8080",
            "/chat",
            "",
            None,
            &HashMap::new(),
            CustomRequestFormat::OpenAi,
            response_format,
            None,
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn passthrough_extracts_plain_text_field() {
        let inv = invoker(CustomResponseFormat::Passthrough);
        let body = json!({ "text": "hello there" });
        let (content, _) = inv.extract_response(&body);
        assert_eq!(content, "hello there");
    }

    #[test]
    fn passthrough_prefers_openai_shape_when_present() {
        let inv = invoker(CustomResponseFormat::Passthrough);
        let body = json!({ "choices": [{ "message": { "content": "from openai" } }], "text": "ignored" });
        let (content, _) = inv.extract_response(&body);
        assert_eq!(content, "from openai");
    }

    #[test]
    fn passthrough_defaults_to_empty_on_unknown_shape() {
        let inv = invoker(CustomResponseFormat::Passthrough);
        let body = json!({ "unexpected": true });
        let (content, _) = inv.extract_response(&body);
        assert_eq!(content, "");
    }
}
