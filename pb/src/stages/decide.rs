//! Step decision stage

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::chat::ChatContext;
use crate::llm::{CompletionRequest, LlmClient, Message, ResponseFormat};
use crate::stream::ObjectStream;

/// Next step of the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Enough information to generate the page
    Generate,
    /// More questions are needed
    Refine,
}

/// Outcome of the step decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDecision {
    pub step: Step,

    /// Clarifying question; empty when generating
    #[serde(default)]
    pub question: String,
}

/// Structured-output schema of [`StepDecision`]
pub fn step_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "step": {
                "type": "string",
                "enum": ["generate", "refine"],
                "description": "'generate' when there is enough information to generate the page, 'refine' when more questions are needed to refine the page generation",
            },
            "question": {
                "type": "string",
                "description": "Questions to ask the user, if need to refine. Empty if generate.",
            },
        },
        "required": ["step", "question"],
        "additionalProperties": false,
    })
}

/// Classify the conversation as ready to generate or needing refinement
///
/// A `refine` decision must carry a question.
pub fn decide(
    llm: Arc<dyn LlmClient>,
    chat: &ChatContext,
    messages: Vec<Message>,
    max_tokens: u32,
) -> ObjectStream<StepDecision> {
    debug!(messages = messages.len(), "decide: called");
    let request = CompletionRequest {
        system_prompt: chat.prompts.choose_step_system(Utc::now()),
        messages,
        response_format: Some(ResponseFormat::new("step_decision", step_schema())),
        max_tokens,
    };

    ObjectStream::spawn_with_validator(
        llm,
        request,
        Box::new(|decision: &StepDecision| {
            if decision.step == Step::Refine && decision.question.trim().is_empty() {
                return Err("refine decision without a question".to_string());
            }
            Ok(())
        }),
    )
}
