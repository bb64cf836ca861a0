//! Streaming reply types and utilities
//!
//! The host emits its final reply as a sequence of events so the HTTP layer
//! can forward text incrementally. Concatenating every `Delta` yields exactly
//! the buffered reply.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while a reply is streamed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Next slice of the reply text
    Delta { content: String },
    /// Stream has completed
    Done,
    /// The reply could not be produced; `message` is safe to show to the client
    Error { message: String },
}

/// Sender for stream events
pub type StreamSender = mpsc::Sender<StreamEvent>;

/// Receiver for stream events
pub type StreamReceiver = mpsc::Receiver<StreamEvent>;

/// Create a new stream channel with specified buffer size
pub fn create_stream_channel(buffer_size: usize) -> (StreamSender, StreamReceiver) {
    mpsc::channel(buffer_size)
}

/// Create a stream channel with default buffer size (32)
pub fn create_default_stream_channel() -> (StreamSender, StreamReceiver) {
    create_stream_channel(32)
}

/// Split text into whitespace-terminated chunks without dropping any character.
pub fn chunk_text(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(char::is_whitespace)
}

/// Accumulator for rebuilding a complete reply from stream events
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    pub content: String,
    pub done: bool,
    pub error: Option<String>,
}

#[cfg(test)]
impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Delta { content } => self.content.push_str(&content),
            StreamEvent::Done => self.done = true,
            StreamEvent::Error { message } => self.error = Some(message),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.done || self.error.is_some()
    }
}
