//! Three-phase object streaming
//!
//! An [`ObjectStream`] runs one structured-output model call in a background
//! task and exposes it as an ordered sequence of phases: one `Loading`, zero
//! or more `Streaming` with the partial object parsed so far, then exactly
//! one `Done` with the final typed object. A failure ends the sequence with
//! an error instead of `Done`. Dropping the stream aborts the model call.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::llm::{CompletionRequest, LlmClient, LlmError, StopReason, StreamChunk};
use crate::partial::parse_partial;

/// Capacity of the raw text chunk channel
const CHUNK_CHANNEL_SIZE: usize = 100;

/// Observable state of a streaming stage
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectPhase<T> {
    /// Stage started, no data yet
    Loading,
    /// Partial object parsed from the output so far
    Streaming(Value),
    /// Final object
    Done(T),
}

/// Failure of a streaming stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("model request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("model output is not a valid object: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("model output does not match the schema: {0}")]
    Rejected(String),

    #[error("model output ended before the object was complete")]
    Incomplete,
}

/// Check applied to the final object before `Done` is emitted
pub type Validator<T> = Box<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

/// Cancellable three-phase stream over one model call
pub struct ObjectStream<T> {
    rx: mpsc::Receiver<Result<ObjectPhase<T>, StageError>>,
    task: JoinHandle<()>,
}

impl<T> ObjectStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Start the model call
    pub fn spawn(llm: Arc<dyn LlmClient>, request: CompletionRequest) -> Self {
        Self::start(llm, request, None)
    }

    /// Start the model call, rejecting a final object the validator refuses
    pub fn spawn_with_validator(llm: Arc<dyn LlmClient>, request: CompletionRequest, validator: Validator<T>) -> Self {
        Self::start(llm, request, Some(validator))
    }

    fn start(llm: Arc<dyn LlmClient>, request: CompletionRequest, validator: Option<Validator<T>>) -> Self {
        debug!(max_tokens = request.max_tokens, "ObjectStream::start: called");
        // Capacity 1: each phase is handed over before the next is produced
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(run(llm, request, validator, tx));
        Self { rx, task }
    }

    /// Next phase; `None` once the stream has finished
    pub async fn next(&mut self) -> Option<Result<ObjectPhase<T>, StageError>> {
        self.rx.recv().await
    }
}

impl<T> Drop for ObjectStream<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<T>(
    llm: Arc<dyn LlmClient>,
    request: CompletionRequest,
    validator: Option<Validator<T>>,
    tx: mpsc::Sender<Result<ObjectPhase<T>, StageError>>,
) where
    T: DeserializeOwned + Send + 'static,
{
    if tx.send(Ok(ObjectPhase::Loading)).await.is_err() {
        return;
    }

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<StreamChunk>(CHUNK_CHANNEL_SIZE);

    // Forward partial objects as the text grows
    let partial_tx = tx.clone();
    let forward_task = tokio::spawn(async move {
        let mut text = String::new();
        let mut last: Option<Value> = None;
        while let Some(chunk) = chunk_rx.recv().await {
            let StreamChunk::TextDelta(delta) = chunk else {
                continue;
            };
            text.push_str(&delta);
            let Some(value) = parse_partial(&text) else {
                continue;
            };
            if last.as_ref() == Some(&value) {
                continue;
            }
            last = Some(value.clone());
            if partial_tx.send(Ok(ObjectPhase::Streaming(value))).await.is_err() {
                break;
            }
        }
        text
    });

    let result = llm.stream(request, chunk_tx).await;
    let streamed = forward_task.await.unwrap_or_default();

    let outcome = match result {
        Ok(response) => {
            info!(
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "Model stream complete"
            );
            let text = response.content.unwrap_or(streamed);
            finish(&text, response.stop_reason, validator.as_ref())
        }
        Err(e) => {
            warn!("Model stream failed: {}", e);
            Err(StageError::Llm(e))
        }
    };

    let _ = tx.send(outcome).await;
}

fn finish<T: DeserializeOwned>(
    text: &str,
    stop_reason: StopReason,
    validator: Option<&Validator<T>>,
) -> Result<ObjectPhase<T>, StageError> {
    debug!(len = text.len(), ?stop_reason, "finish: called");
    if stop_reason == StopReason::MaxTokens {
        return Err(StageError::Incomplete);
    }

    let value: T = match serde_json::from_str(text.trim()) {
        Ok(value) => value,
        Err(e) if e.is_eof() => return Err(StageError::Incomplete),
        Err(e) => return Err(StageError::Malformed(e)),
    };

    if let Some(validate) = validator {
        validate(&value).map_err(StageError::Rejected)?;
    }
    Ok(ObjectPhase::Done(value))
}
