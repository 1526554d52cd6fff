//! # Uniform Chat Request/Response Types
//!
//! The request/response shape the [`crate::adapters`] translate to and from each
//! upstream dialect. Every adapter accepts an [`InvokeRequest`] and returns an
//! [`InvokeResult`] (or a stream of [`StreamChunk`] for `invoke_stream`) regardless
//! of the wire format the upstream actually speaks.

use serde::{Deserialize, Serialize};

/// A single message in the ordered conversation sent to `invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Role of a message sender. Only the three roles the uniform request allows;
/// dialect adapters remap these onto their own vocabulary (e.g. generative-content
/// dialects map `Assistant` to `"model"`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// An opaque tool/function declaration. The core does not interpret tool schemas;
/// it passes them through to adapters that advertise `function_calling` support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool(pub serde_json::Value);

/// The uniform request shape every [`crate::adapters::Invoker`] accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

impl InvokeRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
            stream: None,
            tools: None,
        }
    }

    /// Total content length across all messages, used for token-estimation
    /// (`ceil(sum(len)/4)`) when an upstream doesn't report usage.
    pub fn content_len(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// Reported or estimated token usage for a completed call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The uniform result shape every [`crate::adapters::Invoker`] returns from `invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResult {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub model: String,
    /// Set when a non-streaming-capable dialect degraded `invoke_stream` to a
    /// single emitted chunk, per the adapter set's streaming degradation rule.
    #[serde(default)]
    pub degraded_stream: bool,
}

/// One incremental chunk of a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub finished: bool,
    /// Set when this chunk came from a non-streaming-capable dialect's
    /// single-chunk degradation rather than real incremental upstream output.
    #[serde(default)]
    pub degraded: bool,
}
