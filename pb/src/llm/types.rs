//! LLM request/response types for PageBuilder
//!
//! These types model a chat-completions style API with structured output.
//! Every request here asks for a single JSON object constrained by a schema.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A completion request - everything needed for one LLM call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt (rendered from a prompt template)
    pub system_prompt: String,

    /// Conversation so far, oldest first
    pub messages: Vec<Message>,

    /// Schema the response object must conform to
    pub response_format: Option<ResponseFormat>,

    /// Max tokens for response (from config)
    pub max_tokens: u32,
}

/// Structured-output constraint attached to a request
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    /// Schema name reported to the provider
    pub name: String,

    /// JSON Schema of the expected object
    pub schema: serde_json::Value,
}

impl ResponseFormat {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        let name = name.into();
        debug!(%name, "ResponseFormat::new: called");
        Self { name, schema }
    }

    /// Convert to the OpenAI `response_format` body field
    pub fn to_openai_schema(&self) -> serde_json::Value {
        debug!(%self.name, "ResponseFormat::to_openai_schema: called");
        serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name,
                "strict": true,
                "schema": self.schema,
            }
        })
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        debug!("Message::user: called");
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Create an assistant message with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        debug!("Message::assistant: called");
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Text content (the serialized JSON object for structured requests)
    pub content: Option<String>,

    /// Why the model stopped
    pub stop_reason: StopReason,

    /// Token usage
    pub usage: TokenUsage,
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ContentFilter,
}

impl StopReason {
    /// Parse from an OpenAI `finish_reason` string
    pub fn from_openai(s: &str) -> Self {
        debug!(%s, "StopReason::from_openai: called");
        match s {
            "length" => {
                debug!("StopReason::from_openai: MaxTokens");
                StopReason::MaxTokens
            }
            "content_filter" => {
                debug!("StopReason::from_openai: ContentFilter");
                StopReason::ContentFilter
            }
            _ => {
                debug!("StopReason::from_openai: EndTurn");
                StopReason::EndTurn
            }
        }
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Streaming chunk forwarded while a response is generated
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Text being generated
    TextDelta(String),

    /// Message complete with final stats
    MessageDone { stop_reason: StopReason, usage: TokenUsage },
}
