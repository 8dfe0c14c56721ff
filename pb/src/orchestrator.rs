//! Turn orchestration
//!
//! One turn runs as a sequential pipeline:
//!
//! ```text
//! Init -> Deciding -> Refining                                   (turn ends)
//!                  -> SchemaBuilding -> PageGenerating -> Persisting -> Processing -> Done
//! ```
//!
//! Every phase of the two streaming stages is forwarded, in order, to the
//! turn's event stream under the stage's channel. Any failure stops the
//! turn; [`PageBuilder::stream_page`] reports it as one terminal error event.

use std::fmt;
use std::sync::Arc;

use eyre::eyre;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::catalog::ComponentsProvider;
use crate::chat::ChatContext;
use crate::events::{Channel, Disconnected, EVENT_CHANNEL_SIZE, EventStream, EventWriter};
use crate::llm::LlmClient;
use crate::page::{self, PageResult};
use crate::processor::{LayoutContext, ResultProcessor};
use crate::schema::{PageSchema, SchemaError};
use crate::stages::{self, Step};
use crate::stream::{ObjectPhase, ObjectStream, StageError};
use crate::storage::Storage;

/// Default storage key of the generated page
pub const DEFAULT_PAGE_KEY: &str = "page";

/// Default output token limit per model call
pub const DEFAULT_MAX_TOKENS: u32 = 16384;

/// Pipeline position of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Init,
    Deciding,
    Refining,
    SchemaBuilding,
    PageGenerating,
    Persisting,
    Processing,
    Done,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnState::Init => "init",
            TurnState::Deciding => "deciding",
            TurnState::Refining => "refining",
            TurnState::SchemaBuilding => "schema-building",
            TurnState::PageGenerating => "page-generating",
            TurnState::Persisting => "persisting",
            TurnState::Processing => "processing",
            TurnState::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Why a turn failed
#[derive(Debug, Error)]
pub enum TurnError {
    /// The component catalog cannot be turned into a schema
    #[error("Invalid component catalog: {0}")]
    Configuration(#[from] SchemaError),

    /// The model call failed or produced an unusable object
    #[error("{0}")]
    Model(#[from] StageError),

    /// The component catalog could not be fetched
    #[error("Failed to load components: {0:#}")]
    Catalog(eyre::Report),

    #[error("Failed to save page: {0:#}")]
    Persistence(eyre::Report),

    #[error("Failed to process page: {0:#}")]
    Processing(eyre::Report),

    /// The consumer stopped listening
    #[error("Turn cancelled")]
    Cancelled,
}

impl TurnError {
    /// Failure of a remote collaborator (model or catalog source)
    pub fn is_upstream(&self) -> bool {
        matches!(self, TurnError::Model(_) | TurnError::Catalog(_))
    }
}

impl From<Disconnected> for TurnError {
    fn from(_: Disconnected) -> Self {
        TurnError::Cancelled
    }
}

/// How a successful turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// More information is needed; ask the user this question
    Refine { question: String },
    /// The page was generated, saved and processed
    Generated { name: String, page: PageResult },
}

/// Tunables of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderSettings {
    pub max_tokens: u32,
    /// Storage key the generated page is saved under
    pub page_key: String,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            page_key: DEFAULT_PAGE_KEY.to_string(),
        }
    }
}

/// Page generation pipeline over its collaborators
pub struct PageBuilder {
    llm: Arc<dyn LlmClient>,
    components: Arc<dyn ComponentsProvider>,
    storage: Arc<dyn Storage>,
    processor: Arc<dyn ResultProcessor>,
    settings: BuilderSettings,
}

impl PageBuilder {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        components: Arc<dyn ComponentsProvider>,
        storage: Arc<dyn Storage>,
        processor: Arc<dyn ResultProcessor>,
        settings: BuilderSettings,
    ) -> Self {
        debug!(?settings, "PageBuilder::new: called");
        Self {
            llm,
            components,
            storage,
            processor,
            settings,
        }
    }

    /// Run one turn in the background, returning its event stream
    ///
    /// A failed turn ends the stream with a single error event. Dropping the
    /// stream cancels the turn.
    pub fn stream_page(self: &Arc<Self>, chat: ChatContext) -> EventStream {
        debug!(messages = chat.messages.len(), "stream_page: called");
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let builder = Arc::clone(self);

        let task = tokio::spawn(async move {
            let writer = EventWriter::new(tx);
            match builder.run_turn(&chat, &writer).await {
                Ok(TurnOutcome::Refine { .. }) => info!("Turn finished: refine"),
                Ok(TurnOutcome::Generated { name, .. }) => info!("Turn finished: generated {}", name),
                Err(TurnError::Cancelled) => info!("Turn cancelled by consumer"),
                Err(e) => {
                    warn!(upstream = e.is_upstream(), "Turn failed: {}", e);
                    let _ = writer.error(e.to_string()).await;
                }
            }
        });

        EventStream::new(rx, task)
    }

    /// Run one turn, writing its progress to `writer`
    pub async fn run_turn(&self, chat: &ChatContext, writer: &EventWriter) -> Result<TurnOutcome, TurnError> {
        let mut state = TurnState::Init;
        debug!(%state, "run_turn: called");
        let messages = chat.to_model_messages();

        transition(&mut state, TurnState::Deciding);
        let decision = forward(
            Channel::Step,
            stages::decide(self.llm.clone(), chat, messages.clone(), self.settings.max_tokens),
            writer,
        )
        .await?;

        if decision.step == Step::Refine {
            transition(&mut state, TurnState::Refining);
            return Ok(TurnOutcome::Refine {
                question: decision.question,
            });
        }

        transition(&mut state, TurnState::SchemaBuilding);
        let catalog = self.components.get_components().await.map_err(TurnError::Catalog)?;
        let schema = Arc::new(PageSchema::build(&catalog)?);

        transition(&mut state, TurnState::PageGenerating);
        let page = forward(
            Channel::Page,
            stages::generate(self.llm.clone(), chat, messages, schema, self.settings.max_tokens),
            writer,
        )
        .await?;

        transition(&mut state, TurnState::Persisting);
        let value = serde_json::to_value(&page).map_err(|e| TurnError::Persistence(eyre!(e)))?;
        self.storage
            .save(&self.settings.page_key, &value)
            .await
            .map_err(TurnError::Persistence)?;

        for warning in page::review(&page, &catalog) {
            warn!("Page review: {}", warning);
        }

        transition(&mut state, TurnState::Processing);
        let normalized = page.clone().normalize(&catalog);
        let name = normalized.name.clone();
        self.processor
            .process(normalized, LayoutContext::new(catalog))
            .await
            .map_err(TurnError::Processing)?;

        transition(&mut state, TurnState::Done);
        Ok(TurnOutcome::Generated { name, page })
    }
}

fn transition(state: &mut TurnState, next: TurnState) {
    info!("Turn state: {} -> {}", state, next);
    *state = next;
}

/// Forward every phase of a stage to the writer; returns the final object
async fn forward<T>(channel: Channel, mut stream: ObjectStream<T>, writer: &EventWriter) -> Result<T, TurnError>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    debug!(%channel, "forward: called");
    while let Some(phase) = stream.next().await {
        match phase? {
            ObjectPhase::Loading => writer.loading(channel).await?,
            ObjectPhase::Streaming(partial) => writer.streaming(channel, partial).await?,
            ObjectPhase::Done(value) => {
                let data = serde_json::to_value(&value).map_err(StageError::Malformed)?;
                writer.done(channel, data).await?;
                return Ok(value);
            }
        }
    }
    Err(StageError::Incomplete.into())
}
