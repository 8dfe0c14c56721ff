//! Outbound progress events
//!
//! One turn writes its progress to a single ordered event stream. Every
//! data event names the channel it belongs to (`step` or `page`) and the
//! phase of that channel's stage; a failed turn ends with one error event.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Capacity of the outbound event channel
pub const EVENT_CHANNEL_SIZE: usize = 16;

/// Named progress channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Step,
    Page,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Step => "step",
            Channel::Page => "page",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stage phase reported on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Loading,
    Streaming,
    Done,
}

/// One outbound event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Progress of a stage
    Data {
        channel: Channel,
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// Terminal failure of the turn
    Error { message: String },
}

impl StreamEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error { .. })
    }
}

/// The receiving side went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event stream receiver dropped")]
pub struct Disconnected;

/// Convenience emitter for one turn's events
#[derive(Debug, Clone)]
pub struct EventWriter {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventWriter {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    pub async fn write(&self, event: StreamEvent) -> Result<(), Disconnected> {
        self.tx.send(event).await.map_err(|_| Disconnected)
    }

    pub async fn loading(&self, channel: Channel) -> Result<(), Disconnected> {
        debug!(%channel, "EventWriter::loading: called");
        self.data(channel, Phase::Loading, None).await
    }

    pub async fn streaming(&self, channel: Channel, partial: Value) -> Result<(), Disconnected> {
        self.data(channel, Phase::Streaming, Some(partial)).await
    }

    pub async fn done(&self, channel: Channel, value: Value) -> Result<(), Disconnected> {
        debug!(%channel, "EventWriter::done: called");
        self.data(channel, Phase::Done, Some(value)).await
    }

    pub async fn error(&self, message: impl Into<String>) -> Result<(), Disconnected> {
        self.write(StreamEvent::Error { message: message.into() }).await
    }

    async fn data(&self, channel: Channel, phase: Phase, data: Option<Value>) -> Result<(), Disconnected> {
        self.write(StreamEvent::Data { channel, phase, data }).await
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of a turn, backed by the task producing it
///
/// Dropping the stream aborts the producing task.
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    task: Option<JoinHandle<()>>,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<StreamEvent>, task: JoinHandle<()>) -> Self {
        Self { rx, task: Some(task) }
    }

    /// Stream over a receiver with no owned producer task
    pub fn detached(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self { rx, task: None }
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Stop the producer; events already queued stay readable
    pub fn cancel(&mut self) {
        debug!("EventStream::cancel: called");
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = StreamEvent::Data {
            channel: Channel::Step,
            phase: Phase::Streaming,
            data: Some(json!({"step": "gen"})),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "data", "channel": "step", "phase": "streaming", "data": {"step": "gen"}})
        );

        let loading = StreamEvent::Data {
            channel: Channel::Page,
            phase: Phase::Loading,
            data: None,
        };
        assert_eq!(
            serde_json::to_value(&loading).unwrap(),
            json!({"type": "data", "channel": "page", "phase": "loading"})
        );

        let error = StreamEvent::Error {
            message: "boom".to_string(),
        };
        assert_eq!(serde_json::to_value(&error).unwrap(), json!({"type": "error", "message": "boom"}));
        assert!(error.is_error());
    }

    #[tokio::test]
    async fn test_writer_and_stream() {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let writer = EventWriter::new(tx);
        let task = tokio::spawn(async move {
            writer.loading(Channel::Step).await.unwrap();
            writer.done(Channel::Step, json!({"step": "refine"})).await.unwrap();
        });

        let events: Vec<StreamEvent> = EventStream::new(rx, task).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            StreamEvent::Data {
                channel: Channel::Step,
                phase: Phase::Loading,
                data: None
            }
        ));
    }

    #[tokio::test]
    async fn test_writer_reports_disconnect() {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let writer = EventWriter::new(tx);
        drop(rx);
        assert!(writer.is_closed());
        assert_eq!(writer.loading(Channel::Page).await, Err(Disconnected));
    }

    #[tokio::test]
    async fn test_cancel_aborts_producer() {
        let (tx, rx) = mpsc::channel(1);
        let writer = EventWriter::new(tx);
        let task = tokio::spawn(async move {
            loop {
                if writer.loading(Channel::Page).await.is_err() {
                    break;
                }
            }
        });

        let mut stream = EventStream::new(rx, task);
        assert!(stream.recv().await.is_some());
        stream.cancel();
        // Drains at most the buffered event, then ends
        let mut rest = 0;
        while stream.recv().await.is_some() {
            rest += 1;
        }
        assert!(rest <= 1);
    }
}
