//! Chat transport and session state
//!
//! A [`Transport`] turns the conversation into a turn's event stream. A
//! [`ChatSession`] owns the conversation, folds incoming events into the
//! assistant's reply and publishes every change as a [`ChatSnapshot`].

use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, bail};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chat::UiMessage;
use crate::events::{EventStream, StreamEvent};

/// Starts a turn for a conversation
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_messages(&self, messages: Vec<UiMessage>) -> Result<EventStream>;
}

/// Transport backed by a function producing the event stream
pub struct StreamChatTransport<F> {
    handler: F,
}

impl<F> StreamChatTransport<F>
where
    F: Fn(Vec<UiMessage>) -> EventStream + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> Transport for StreamChatTransport<F>
where
    F: Fn(Vec<UiMessage>) -> EventStream + Send + Sync,
{
    async fn send_messages(&self, messages: Vec<UiMessage>) -> Result<EventStream> {
        debug!(count = messages.len(), "StreamChatTransport::send_messages: called");
        Ok((self.handler)(messages))
    }
}

/// Session status as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatStatus {
    /// Nothing sent yet
    Idle,
    /// A turn is running
    InProgress,
    /// The last turn finished; input is accepted
    Ready,
    /// The last turn failed; input is accepted
    Error,
}

impl ChatStatus {
    pub fn accepts_input(&self) -> bool {
        !matches!(self, ChatStatus::InProgress)
    }
}

impl std::fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChatStatus::Idle => "idle",
            ChatStatus::InProgress => "in-progress",
            ChatStatus::Ready => "ready",
            ChatStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Published state of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSnapshot {
    pub messages: Vec<UiMessage>,
    pub status: ChatStatus,
    pub error: Option<String>,
}

impl Default for ChatSnapshot {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            status: ChatStatus::Idle,
            error: None,
        }
    }
}

/// Conversation driven through a transport
pub struct ChatSession {
    transport: Arc<dyn Transport>,
    state: watch::Sender<ChatSnapshot>,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(ChatSnapshot::default());
        Self { transport, state }
    }

    /// Receiver observing every state change
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.state.borrow().clone()
    }

    /// Send a user message and run the turn to completion
    ///
    /// Returns the status the turn ended in. A failed turn is reported
    /// through the status and the snapshot's error, not as `Err`; `Err`
    /// means the message could not be sent at all.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<ChatStatus> {
        debug!("ChatSession::send_message: called");
        let message = UiMessage::user(text);
        let mut messages = Vec::new();
        // Check and claim under one lock; a second sender sees InProgress
        let started = self.state.send_if_modified(|s| {
            if !s.status.accepts_input() {
                return false;
            }
            s.messages.push(message);
            s.status = ChatStatus::InProgress;
            s.error = None;
            messages = s.messages.clone();
            true
        });
        if !started {
            bail!("A message is already in progress");
        }

        let mut stream = match self.transport.send_messages(messages).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to start turn: {:#}", e);
                self.fail(format!("{:#}", e));
                return Ok(ChatStatus::Error);
            }
        };

        self.state.send_modify(|s| s.messages.push(UiMessage::assistant()));

        let mut error = None;
        while let Some(event) = stream.recv().await {
            match &event {
                StreamEvent::Error { message } => error = Some(message.clone()),
                StreamEvent::Data { .. } => self.state.send_modify(|s| {
                    if let Some(reply) = s.messages.last_mut() {
                        reply.apply(&event);
                    }
                }),
            }
        }

        // Drop a reply that never received content
        self.state.send_modify(|s| {
            if s.messages.last().is_some_and(|m| m.parts.is_empty()) {
                s.messages.pop();
            }
        });

        match error {
            Some(message) => {
                self.fail(message);
                Ok(ChatStatus::Error)
            }
            None => {
                info!("Turn complete");
                self.state.send_modify(|s| s.status = ChatStatus::Ready);
                Ok(ChatStatus::Ready)
            }
        }
    }

    fn fail(&self, message: String) {
        self.state.send_modify(|s| {
            s.status = ChatStatus::Error;
            s.error = Some(message);
        });
    }
}
