//! OpenAI Chat Completions client
//!
//! Streams JSON-schema constrained completions over server-sent events.
//! Each `data:` line carries a chunk with a content delta; the last one
//! carries token usage (requested through `stream_options`).

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, StopReason, StreamChunk, TokenUsage};
use crate::config::LlmConfig;

/// Attempts per request for transient failures
const MAX_ATTEMPTS: u32 = 4;

/// Delay before the first retry; doubles on each further retry
const BASE_BACKOFF: Duration = Duration::from_millis(1000);

/// Wait assumed when a 429 response has no usable `retry-after`
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// OpenAI (or OpenAI-compatible) client
pub struct OpenAIClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAIClient {
    /// Build a client, reading the API key from the configured variable
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(model = %config.model, base_url = %config.base_url, "from_config: called");
        let api_key = config
            .get_api_key()
            .map_err(|_| LlmError::MissingApiKey(config.api_key_env.clone()))?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Request body for a streamed completion
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, %request.max_tokens, "build_request_body: called");

        let messages: Vec<serde_json::Value> = std::iter::once(serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        }))
        .chain(request.messages.iter().map(|msg| {
            serde_json::json!({
                "role": msg.role.as_str(),
                "content": msg.content,
            })
        }))
        .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        // Reasoning models only accept max_completion_tokens
        let limit_key = if self.is_reasoning_model() {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        body[limit_key] = serde_json::json!(request.max_tokens.min(self.max_tokens));

        if let Some(format) = &request.response_format {
            body["response_format"] = format.to_openai_schema();
        }
        body
    }

    fn is_reasoning_model(&self) -> bool {
        ["gpt-5", "o1", "o3", "o4"].iter().any(|p| self.model.starts_with(p))
    }

    /// One POST attempt; a non-success status becomes an error
    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout)
                } else {
                    LlmError::Network(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(LlmError::RateLimited { retry_after });
        }

        let message = response.text().await.unwrap_or_default();
        Err(LlmError::Api {
            status: status.as_u16(),
            message: api_error_message(&message),
        })
    }

    /// POST with exponential backoff on transient failures
    ///
    /// Only the connection phase is retried; once the event stream has
    /// started, a failure ends the request.
    async fn post_with_retry(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let mut attempt = 1;
        loop {
            match self.post(body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    let backoff = BASE_BACKOFF * 2u32.pow(attempt - 1);
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, "post_with_retry: {}", e);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The `error.message` of an API error body, or the body itself
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<OpenAIErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Splits a byte stream into lines
///
/// Network chunks may end inside a multi-byte character, so bytes are only
/// decoded once their line is complete.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line, without its `\n`
    fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line[..end]).into_owned())
    }

    /// Unterminated last line
    fn rest(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned()
    }
}

/// Accumulated state of one streamed completion
#[derive(Debug, Default)]
struct StreamState {
    content: String,
    stop_reason: Option<StopReason>,
    usage: TokenUsage,
}

impl StreamState {
    /// Apply one SSE line; returns the content delta it carried, if any
    fn apply_line(&mut self, line: &str) -> Result<Option<String>, LlmError> {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            return Ok(None);
        };
        if data.is_empty() || data == "[DONE]" {
            return Ok(None);
        }

        let chunk = match serde_json::from_str::<OpenAIStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "apply_line: skipping unparseable event");
                return Ok(None);
            }
        };

        if let Some(error) = chunk.error {
            return Err(LlmError::InvalidResponse(error.message));
        }
        if let Some(usage) = chunk.usage {
            self.usage = TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            };
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };
        if let Some(refusal) = choice.delta.refusal {
            return Err(LlmError::Refused(refusal));
        }
        if let Some(reason) = choice.finish_reason {
            self.stop_reason = Some(StopReason::from_openai(&reason));
        }

        let delta = choice.delta.content.filter(|c| !c.is_empty());
        if let Some(text) = &delta {
            self.content.push_str(text);
        }
        Ok(delta)
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, %request.max_tokens, "stream: called");
        let body = self.build_request_body(&request);
        let response = self.post_with_retry(&body).await?;

        let mut bytes = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut state = StreamState::default();

        while let Some(chunk) = bytes.next().await {
            lines.extend(&chunk?);
            while let Some(line) = lines.next_line() {
                if let Some(delta) = state.apply_line(line.trim())? {
                    // A closed receiver only means nobody watches progress
                    let _ = chunk_tx.send(StreamChunk::TextDelta(delta)).await;
                }
            }
        }
        if let Some(delta) = state.apply_line(lines.rest().trim())? {
            let _ = chunk_tx.send(StreamChunk::TextDelta(delta)).await;
        }

        let stop_reason = state.stop_reason.unwrap_or(StopReason::EndTurn);
        debug!(
            content_len = state.content.len(),
            input_tokens = state.usage.input_tokens,
            output_tokens = state.usage.output_tokens,
            ?stop_reason,
            "stream: complete"
        );

        let _ = chunk_tx
            .send(StreamChunk::MessageDone {
                stop_reason: stop_reason.clone(),
                usage: state.usage.clone(),
            })
            .await;

        Ok(CompletionResponse {
            content: Some(state.content).filter(|c| !c.is_empty()),
            stop_reason,
            usage: state.usage,
        })
    }
}

// Wire types

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    usage: Option<OpenAIUsage>,
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OpenAIStreamDelta {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorBody {
    error: OpenAIError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, ResponseFormat};

    fn client(model: &str, max_tokens: u32) -> OpenAIClient {
        OpenAIClient {
            model: model.to_string(),
            api_key: "test-key".to_string(),
            base_url: "https://api.openai.com".to_string(),
            http: Client::new(),
            max_tokens,
            timeout: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_build_request_body_basic() {
        let request = CompletionRequest {
            system_prompt: "You are helpful".to_string(),
            messages: vec![Message::user("Hello"), Message::assistant("What page?")],
            response_format: None,
            max_tokens: 1000,
        };

        let body = client("gpt-4.1-nano", 8192).build_request_body(&request);

        assert_eq!(body["model"], "gpt-4.1-nano");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You are helpful");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_build_request_body_with_response_format() {
        let request = CompletionRequest {
            system_prompt: "Decide".to_string(),
            messages: vec![Message::user("Hello")],
            response_format: Some(ResponseFormat::new("step", serde_json::json!({"type": "object"}))),
            max_tokens: 1000,
        };

        let body = client("gpt-4.1-nano", 8192).build_request_body(&request);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "step");
    }

    #[test]
    fn test_max_tokens_capped() {
        let request = CompletionRequest {
            system_prompt: "Test".to_string(),
            messages: vec![],
            response_format: None,
            max_tokens: 5000,
        };

        let body = client("gpt-4.1-nano", 1000).build_request_body(&request);
        assert_eq!(body["max_tokens"], 1000);
    }

    #[test]
    fn test_completion_tokens_for_reasoning_models() {
        let request = CompletionRequest {
            system_prompt: "Test".to_string(),
            messages: vec![],
            response_format: None,
            max_tokens: 500,
        };

        let body = client("o3-mini", 1000).build_request_body(&request);
        assert_eq!(body["max_completion_tokens"], 500);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_stream_state_accumulates_lines() {
        let mut state = StreamState::default();
        let delta = state
            .apply_line(r#"data: {"choices":[{"delta":{"content":"{\"st"},"finish_reason":null}]}"#)
            .unwrap();
        assert_eq!(delta.as_deref(), Some("{\"st"));

        let delta = state
            .apply_line(r#"data: {"choices":[{"delta":{"content":"ep\":1}"},"finish_reason":"stop"}]}"#)
            .unwrap();
        assert_eq!(delta.as_deref(), Some("ep\":1}"));

        let usage = r#"data: {"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":34}}"#;
        assert_eq!(state.apply_line(usage).unwrap(), None);
        assert_eq!(state.apply_line("data: [DONE]").unwrap(), None);
        assert_eq!(state.apply_line(": keep-alive").unwrap(), None);

        assert_eq!(state.content, "{\"step\":1}");
        assert_eq!(state.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(state.usage.output_tokens, 34);
    }

    #[test]
    fn test_stream_state_refusal_and_error() {
        let mut state = StreamState::default();
        let err = state
            .apply_line(r#"data: {"choices":[{"delta":{"refusal":"I can't help with that"},"finish_reason":null}]}"#)
            .unwrap_err();
        assert!(matches!(err, LlmError::Refused(ref r) if r == "I can't help with that"));

        let err = state
            .apply_line(r#"data: {"error":{"message":"server overloaded"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("server overloaded"));
    }

    #[test]
    fn test_line_buffer_keeps_split_characters() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"über\"}}]}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut lines = LineBuffer::default();
        lines.extend(&line[..split]);
        assert_eq!(lines.next_line(), None);
        lines.extend(&line[split..]);
        lines.extend(b"data: [DO");

        let first = lines.next_line().unwrap();
        assert!(first.contains("über"), "decoded {}", first);
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.rest(), "data: [DO");
    }

    /// Serve one canned SSE response, written in the given pieces
    async fn serve_sse(pieces: Vec<Vec<u8>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Read the whole request before answering
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            for piece in pieces {
                socket.write_all(&piece).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            let _ = socket.shutdown().await;
        });
        url
    }

    #[tokio::test]
    async fn test_stream_decodes_characters_split_across_chunks() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"\\\"über\\\"\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        )
        .as_bytes();
        let split = body.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let url = serve_sse(vec![body[..split].to_vec(), body[split..].to_vec()]).await;

        let mut openai = client("gpt-4.1-nano", 1000);
        openai.base_url = url;
        openai.http = Client::builder().no_proxy().build().unwrap();
        let request = CompletionRequest {
            system_prompt: "Test".to_string(),
            messages: vec![Message::user("Hello")],
            response_format: None,
            max_tokens: 100,
        };
        let (tx, mut rx) = mpsc::channel(16);
        let response = openai.stream(request, tx).await.unwrap();

        assert_eq!(response.content.as_deref(), Some("\"über\""));
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        let Some(StreamChunk::TextDelta(delta)) = rx.recv().await else {
            panic!("expected a text delta");
        };
        assert_eq!(delta, "\"über\"");
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"error":{"message":"Invalid schema for response_format 'page'","type":"invalid_request_error"}}"#;
        assert_eq!(api_error_message(body), "Invalid schema for response_format 'page'");
        assert_eq!(api_error_message(" Bad Gateway \n"), "Bad Gateway");
    }
}
