//! LlmClient trait definition

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CompletionRequest, CompletionResponse, LlmError, StreamChunk};

/// Stateless LLM client - each call is independent
///
/// The client handle is created once at startup and passed explicitly to
/// everything that talks to the model. No conversation state is kept
/// between calls; the full chat history travels with every request.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Streaming completion
    ///
    /// Sends chunks to the provided channel as they arrive.
    /// Returns the final complete response.
    async fn stream(
        &self,
        request: CompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::debug;

    use crate::llm::{StopReason, TokenUsage};

    /// Size of the text pieces the mock streams
    const CHUNK_CHARS: usize = 7;

    /// One scripted model reply
    #[derive(Debug, Clone)]
    pub enum MockReply {
        /// Stream this text, then finish normally
        Text(String),
        /// Fail the call with an API error carrying this message
        Fail(String),
    }

    /// Mock LLM client for unit tests
    ///
    /// Replies are consumed in order, one per call. Text replies are streamed
    /// in small chunks so partial parsing gets exercised.
    pub struct MockLlmClient {
        replies: Vec<MockReply>,
        call_count: AtomicUsize,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl MockLlmClient {
        pub fn new(replies: Vec<MockReply>) -> Self {
            debug!(reply_count = %replies.len(), "MockLlmClient::new: called");
            Self {
                replies,
                call_count: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Mock replying with these JSON documents in order
        pub fn with_json(values: Vec<serde_json::Value>) -> Self {
            Self::new(values.into_iter().map(|v| MockReply::Text(v.to_string())).collect())
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Requests received so far
        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn stream(
            &self,
            request: CompletionRequest,
            chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<CompletionResponse, LlmError> {
            debug!("MockLlmClient::stream: called");
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request);
            }

            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.get(idx).cloned().ok_or_else(|| {
                debug!("MockLlmClient::stream: no more mock replies");
                LlmError::InvalidResponse("No more mock responses".to_string())
            })?;

            let text = match reply {
                MockReply::Text(text) => text,
                MockReply::Fail(message) => {
                    return Err(LlmError::Api { status: 500, message });
                }
            };

            let chars: Vec<char> = text.chars().collect();
            for piece in chars.chunks(CHUNK_CHARS) {
                let _ = chunk_tx.send(StreamChunk::TextDelta(piece.iter().collect())).await;
            }

            let usage = TokenUsage {
                input_tokens: 10,
                output_tokens: chars.len() as u64,
            };
            let _ = chunk_tx
                .send(StreamChunk::MessageDone {
                    stop_reason: StopReason::EndTurn,
                    usage: usage.clone(),
                })
                .await;

            Ok(CompletionResponse {
                content: Some(text),
                stop_reason: StopReason::EndTurn,
                usage,
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn request() -> CompletionRequest {
            CompletionRequest {
                system_prompt: "Test".to_string(),
                messages: vec![],
                response_format: None,
                max_tokens: 1000,
            }
        }

        #[tokio::test]
        async fn test_mock_client_streams_replies_in_chunks() {
            let client = MockLlmClient::new(vec![MockReply::Text("{\"step\":\"generate\"}".to_string())]);
            let (tx, mut rx) = mpsc::channel(100);

            let response = client.stream(request(), tx).await.unwrap();
            assert_eq!(response.content.as_deref(), Some("{\"step\":\"generate\"}"));

            let mut text = String::new();
            let mut deltas = 0;
            while let Some(chunk) = rx.recv().await {
                if let StreamChunk::TextDelta(delta) = chunk {
                    text.push_str(&delta);
                    deltas += 1;
                }
            }
            assert_eq!(text, "{\"step\":\"generate\"}");
            assert!(deltas > 1);
            assert_eq!(client.call_count(), 1);
            assert_eq!(client.requests().len(), 1);
        }

        #[tokio::test]
        async fn test_mock_client_errors_when_exhausted() {
            let client = MockLlmClient::new(vec![]);
            let (tx, _rx) = mpsc::channel(100);
            assert!(client.stream(request(), tx).await.is_err());
        }

        #[tokio::test]
        async fn test_mock_client_scripted_failure() {
            let client = MockLlmClient::new(vec![MockReply::Fail("boom".to_string())]);
            let (tx, _rx) = mpsc::channel(100);
            let err = client.stream(request(), tx).await.unwrap_err();
            assert!(err.to_string().contains("boom"));
        }
    }
}
