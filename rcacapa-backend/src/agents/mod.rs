//! Specialist agents and the concurrent dispatch core
//!
//! ## Flow
//!
//! ```text
//! Task → Dispatcher ─┬─ AgentProxy (categoriser) ─┐
//!                    └─ AgentProxy (data)        ─┴→ DispatchResult → aggregate() → reply
//! ```
//!
//! Every proxy invocation settles into an [`AgentOutcome`]; failures never
//! escape the dispatcher as errors.

pub mod aggregator;
pub mod azure_proxy;
pub mod dispatcher;
pub mod service;

#[cfg(test)]
pub mod mock;

pub use aggregator::{aggregate, AggregatedReply};
pub use azure_proxy::AzureAgentProxy;
pub use dispatcher::{DispatchError, DispatchResult, Dispatcher};
pub use service::AgentServiceClient;

use crate::ai::ErrorKind;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One user query handed to a dispatch round
#[derive(Debug, Clone)]
pub struct Task {
    id: Uuid,
    text: Arc<str>,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: Arc::from(text.into()),
        }
    }

    /// Identifies the round this task belongs to; not persisted
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Result of one agent's participation in a dispatch round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    Success { agent_name: String, text: String },
    Failure { agent_name: String, kind: ErrorKind },
    Timeout { agent_name: String },
}

impl AgentOutcome {
    pub fn agent_name(&self) -> &str {
        match self {
            AgentOutcome::Success { agent_name, .. }
            | AgentOutcome::Failure { agent_name, .. }
            | AgentOutcome::Timeout { agent_name } => agent_name,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AgentOutcome::Success { .. })
    }

    /// Timeouts and transient failures may still resolve on a later read
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentOutcome::Timeout { .. }
                | AgentOutcome::Failure { kind: ErrorKind::Transient, .. }
        )
    }
}

impl fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentOutcome::Success { agent_name, text } => {
                write!(f, "{}: success ({} chars)", agent_name, text.len())
            }
            AgentOutcome::Failure { agent_name, kind } => write!(f, "{}: failed ({})", agent_name, kind),
            AgentOutcome::Timeout { agent_name } => write!(f, "{}: timed out", agent_name),
        }
    }
}

/// Uniform capability wrapping one remote agent
#[async_trait]
pub trait AgentProxy: Send + Sync {
    /// Display name used for attribution
    fn name(&self) -> &str;

    /// Submit `task` and wait at most `deadline` for a textual answer.
    /// Never returns an error: every failure is folded into the outcome.
    async fn invoke(&self, task: &Task, deadline: Duration) -> AgentOutcome;

    /// Read work already submitted for `task` once more, without resubmitting.
    /// `None` means nothing new is available.
    async fn follow_up(&self, _task: &Task) -> Option<AgentOutcome> {
        None
    }

    /// Best-effort cleanup of remote work still held for `task`
    fn release(&self, _task: &Task) {}

    /// Cancel and clean up everything still held; used at shutdown
    fn release_all(&self) {}
}

pub type BoxedAgent = Arc<dyn AgentProxy>;
