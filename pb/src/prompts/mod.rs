//! Prompt Template System
//!
//! Holds the system prompts of the two model stages and renders them.
//!
//! Template loading chain:
//! 1. `{prompts.dir}/{name}.pmt` (user override)
//! 2. Embedded fallback in code
//!
//! Templates use `{{name}}` placeholders. Unknown names are left in place.

pub mod embedded;
mod loader;
mod render;

pub use loader::{PromptLoader, Prompts, StagePrompt};
pub use render::{render, time_context};
