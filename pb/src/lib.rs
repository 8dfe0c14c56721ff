//! PageBuilder - conversational page layout generator
//!
//! PageBuilder turns a chat about a web page into a structured page layout
//! built from a site's component catalog. Each turn first asks the model
//! whether the conversation is ready for generation; if so it derives a JSON
//! Schema from the catalog, streams a schema-constrained page, saves it and
//! hands it to a result processor.
//!
//! # Core Concepts
//!
//! - **Three-phase stages**: every model stage reports `loading`, any number
//!   of `streaming` partial objects, then exactly one `done`
//! - **One event stream per turn**: stage phases are tagged with their
//!   channel (`step`, `page`); failures end the stream with one error event
//! - **Catalog-driven schema**: recursive component nesting is expressed
//!   through named `$defs` references
//!
//! # Modules
//!
//! - [`orchestrator`] - Turn pipeline and error taxonomy
//! - [`stages`] - Step decision and page generation
//! - [`schema`] - Page schema generation from the catalog
//! - [`stream`] / [`partial`] - Three-phase object streaming
//! - [`catalog`] - Component catalog and providers
//! - [`transport`] / [`chat`] - Chat sessions and messages
//! - [`llm`] - LLM client trait and OpenAI implementation
//! - [`config`] - Configuration types and loading

pub mod catalog;
pub mod chat;
pub mod cli;
pub mod config;
pub mod events;
pub mod llm;
pub mod orchestrator;
pub mod page;
pub mod partial;
pub mod processor;
pub mod prompts;
pub mod repl;
pub mod schema;
pub mod stages;
pub mod storage;
pub mod stream;
pub mod transport;

pub use catalog::{CachedComponentsProvider, Component, ComponentCatalog, ComponentsProvider, FileComponentsProvider};
pub use chat::{ChatContext, MessagePart, UiMessage, UiRole};
pub use config::Config;
pub use events::{Channel, EventStream, EventWriter, Phase, StreamEvent};
pub use orchestrator::{BuilderSettings, PageBuilder, TurnError, TurnOutcome};
pub use page::{NormalizedPage, PageResult, PlacedComponent};
pub use processor::{LayoutContext, LayoutProcessor, ResultProcessor};
pub use schema::{PageSchema, SchemaError};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use transport::{ChatSession, ChatStatus, StreamChatTransport, Transport};
