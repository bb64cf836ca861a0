//! Shared types for the RCA/CAPA query service and its HTTP clients.

use serde::{Deserialize, Serialize};

/// Conversation used when the caller does not supply one.
pub const DEFAULT_CONVERSATION_ID: &str = "default";

fn default_conversation_id() -> String {
    DEFAULT_CONVERSATION_ID.to_string()
}

// =====================================================
// Request Types
// =====================================================

/// Body of `POST /rcacapa-query` and `POST /rcacapa-query/stream_plain`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub user_query: String,
    #[serde(default = "default_conversation_id")]
    pub conversation_id: String,
}

impl QueryRequest {
    pub fn new(user_query: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            conversation_id: conversation_id.into(),
        }
    }
}

// =====================================================
// Response Types
// =====================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub assistant: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

/// Session statistics exposed by the health controller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub busy_sessions: usize,
    pub turns_processed: u64,
}
