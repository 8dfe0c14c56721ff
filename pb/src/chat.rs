//! Conversation types
//!
//! UI messages hold text parts and data parts. Data parts mirror the latest
//! state of a progress channel, so an assistant message shows the step
//! decision and the generated page as they evolve.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::events::{Channel, Phase, StreamEvent};
use crate::llm::Message;
use crate::prompts::Prompts;

/// Author of a UI message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiRole {
    User,
    Assistant,
}

/// Part of a UI message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text {
        text: String,
    },
    /// Latest state of a progress channel
    Data {
        id: Channel,
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

/// A message as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMessage {
    pub id: String,
    pub role: UiRole,
    pub parts: Vec<MessagePart>,
}

impl UiMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role: UiRole::User,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    pub fn assistant() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role: UiRole::Assistant,
            parts: Vec::new(),
        }
    }

    /// Fold a data event into this message
    ///
    /// A data part replaces the previous part of the same channel. Error
    /// events are not message content and are ignored.
    pub fn apply(&mut self, event: &StreamEvent) {
        let StreamEvent::Data { channel, phase, data } = event else {
            return;
        };
        let part = MessagePart::Data {
            id: *channel,
            phase: *phase,
            data: data.clone(),
        };
        let existing = self
            .parts
            .iter_mut()
            .find(|p| matches!(p, MessagePart::Data { id, .. } if id == channel));
        match existing {
            Some(slot) => *slot = part,
            None => self.parts.push(part),
        }
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Data { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Final data of a channel, once its stage is done
    pub fn done_data(&self, channel: Channel) -> Option<&Value> {
        self.parts.iter().find_map(|p| match p {
            MessagePart::Data {
                id,
                phase: Phase::Done,
                data,
            } if *id == channel => data.as_ref(),
            _ => None,
        })
    }

    /// Text the model should see for this message
    fn model_text(&self) -> String {
        let mut text = self.text();
        if self.role == UiRole::Assistant
            && let Some(question) = self
                .done_data(Channel::Step)
                .and_then(|d| d.get("question"))
                .and_then(Value::as_str)
                .filter(|q| !q.trim().is_empty())
        {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(question);
        }
        text
    }
}

/// Input of one turn: the conversation so far and the prompts to use
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub messages: Vec<UiMessage>,
    pub prompts: Prompts,
}

impl ChatContext {
    pub fn new(messages: Vec<UiMessage>, prompts: Prompts) -> Self {
        Self { messages, prompts }
    }

    /// Model messages for the conversation
    ///
    /// Messages without model-visible text are skipped.
    pub fn to_model_messages(&self) -> Vec<Message> {
        debug!(count = self.messages.len(), "ChatContext::to_model_messages: called");
        self.messages
            .iter()
            .filter_map(|m| {
                let text = m.model_text();
                if text.trim().is_empty() {
                    return None;
                }
                Some(match m.role {
                    UiRole::User => Message::user(text),
                    UiRole::Assistant => Message::assistant(text),
                })
            })
            .collect()
    }
}
