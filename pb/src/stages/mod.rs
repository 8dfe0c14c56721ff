//! Streaming model stages
//!
//! Each stage assembles one structured-output request (rendered system
//! prompt, conversation, schema) and re-exposes the model's output as an
//! [`ObjectStream`](crate::stream::ObjectStream).

mod decide;
mod generate;

pub use decide::{Step, StepDecision, decide, step_schema};
pub use generate::generate;
