//! Scripted host model for tests.

use super::{AiError, ChatModel, Message};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

pub struct MockChatModel {
    responses: Mutex<VecDeque<Result<String, AiError>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl MockChatModel {
    pub fn new(responses: Vec<Result<String, AiError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Message lists received so far, one entry per call
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn generate_text(&self, messages: Vec<Message>) -> Result<String, AiError> {
        self.seen.lock().push(messages);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AiError::protocol("mock model has no scripted response")))
    }
}
