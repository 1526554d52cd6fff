//! Messages-shaped dialect strategy (vendor-B). `POST {base}/v1/messages` with a
//! vendor-specific auth header, a top-level `system` string lifted out of the
//! message array, and a `{content: [{text}], usage}` response — the one dialect
//! in this set whose wire shape doesn't carry system prompts inline.

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
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<WireContentBlock>,
    model: String,
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireContentBlock {
    text: String,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Splits the uniform message array into Messages-shaped `(system, rest)`: every
/// `Role::System` message is concatenated (newline-joined) into the lifted
/// `system` field; everything else keeps its order.
fn split_system(messages: &[Message]) -> (Option<String>, Vec<WireMessage<'_>>) {
    let mut system = String::new();
    let mut rest = Vec::with_capacity(messages.len());
    for m in messages {
        match m.role {
            Role::System => {
                if !system.is_empty() {
                    system.push('\n');
                }
                system.push_str(&m.content);
            }
            Role::User => rest.push(WireMessage {
                role: "user",
                content: &m.content,
            }),
            Role::Assistant => rest.push(WireMessage {
                role: "assistant",
                content: &m.content,
            }),
        }
    }
    (if system.is_empty() { None } else { Some(system) }, rest)
}

pub struct MessagesShapedInvoker {
    http: AdapterHttp,
    default_model: Option<String>,
    known_models: Vec<String>,
}

impl MessagesShapedInvoker {
    pub fn new(
        base_url: impl Into<String>,
        api_key: &str,
        auth_header: &str,
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
                name: auth_header.to_string(),
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
impl Invoker for MessagesShapedInvoker {
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResult, ProviderError> {
        let model = request
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .unwrap_or_default();
        let (system, messages) = split_system(&request.messages);

        let wire = WireRequest {
            model: &model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: request.temperature,
        };

        let resp: WireResponse = self.http.post_json("/v1/messages", &wire).await?;
        let content = resp.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join("");

        Ok(InvokeResult {
            content,
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
            model: resp.model,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_lifted_and_joined() {
        let messages = vec![
            Message::system("be terse"),
            Message::system("no markdown"),
            Message::user("hi"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system, Some("be terse\nno markdown".to_string()));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].role, "user");
    }

    #[test]
    fn no_system_messages_yields_none() {
        let messages = vec![Message::user("hi")];
        let (system, rest) = split_system(&messages);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }
}
