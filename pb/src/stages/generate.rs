//! Page generation stage

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::chat::ChatContext;
use crate::llm::{CompletionRequest, LlmClient, Message, ResponseFormat};
use crate::page::PageResult;
use crate::schema::PageSchema;
use crate::stream::ObjectStream;

/// Generate the page, constrained to the catalog's schema
///
/// The final page is checked against the schema's structure before it is
/// reported as done.
pub fn generate(
    llm: Arc<dyn LlmClient>,
    chat: &ChatContext,
    messages: Vec<Message>,
    schema: Arc<PageSchema>,
    max_tokens: u32,
) -> ObjectStream<PageResult> {
    debug!(messages = messages.len(), "generate: called");
    let request = CompletionRequest {
        system_prompt: chat.prompts.generate_page_system(Utc::now()),
        messages,
        response_format: Some(ResponseFormat::new("page", schema.to_json_schema())),
        max_tokens,
    };

    ObjectStream::spawn_with_validator(
        llm,
        request,
        Box::new(move |page: &PageResult| {
            let violations = schema.violations(page);
            if violations.is_empty() {
                return Ok(());
            }
            for violation in &violations {
                warn!("Generated page violates schema: {}", violation);
            }
            Err(violations.join("; "))
        }),
    )
}
