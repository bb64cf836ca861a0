//! Conversation session store
//!
//! Process-wide map from conversation id to dialogue state. Sessions are
//! created lazily on first reference and live for the whole process; an
//! eviction policy belongs to the deployment.

mod lanes;

pub use lanes::{LaneGuard, LaneManager};

use crate::ai::Message;
use crate::host::RouterState;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rcacapa_types::SessionStats;
use std::sync::Arc;

/// One user/assistant exchange
#[derive(Debug, Clone)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
    pub at: DateTime<Utc>,
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    turns: RwLock<Vec<Turn>>,
    state: Mutex<RouterState>,
}

impl Session {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            created_at: Utc::now(),
            turns: RwLock::new(Vec::new()),
            state: Mutex::new(RouterState::Idle),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[cfg(test)]
    pub fn turns(&self) -> Vec<Turn> {
        self.turns.read().clone()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.read().len()
    }

    /// Record one exchange; returns when it was recorded
    pub fn append_turn(&self, user: &str, assistant: &str) -> DateTime<Utc> {
        let turn = Turn {
            user: user.to_string(),
            assistant: assistant.to_string(),
            at: Utc::now(),
        };
        let at = turn.at;
        self.turns.write().push(turn);
        at
    }

    /// Prior turns as chat messages, oldest first
    pub fn history(&self) -> Vec<Message> {
        self.turns
            .read()
            .iter()
            .flat_map(|t| [Message::user(t.user.clone()), Message::assistant(t.assistant.clone())])
            .collect()
    }

    pub fn state(&self) -> RouterState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: RouterState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        log::debug!("[SESSION] {}: {} -> {}", self.id, previous, state);
    }
}

/// Exclusive access to one conversation for the duration of a turn.
///
/// Dropping it (after [`SessionStore::append_turn`] or on error) resets the
/// session to idle and frees the lane for the next request of the same
/// conversation.
pub struct SessionTurn {
    session: Arc<Session>,
    _lane: LaneGuard,
}

impl SessionTurn {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for SessionTurn {
    fn drop(&mut self) {
        if self.session.state() != RouterState::Idle {
            self.session.set_state(RouterState::Idle);
        }
    }
}

pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    lanes: Arc<LaneManager>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            lanes: LaneManager::new(),
        }
    }

    /// Existing session for `conversation_id`, or a new one.
    ///
    /// Creation happens under the map's shard lock, so concurrent first
    /// calls for one id all observe the same instance.
    pub fn get_or_create(&self, conversation_id: &str) -> Arc<Session> {
        self.sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                log::info!("[SESSION] Created session {}", conversation_id);
                Arc::new(Session::new(conversation_id))
            })
            .clone()
    }

    #[cfg(test)]
    pub fn get(&self, conversation_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(conversation_id).map(|s| s.clone())
    }

    pub fn append_turn(&self, session: &Session, user: &str, assistant: &str) {
        let at = session.append_turn(user, assistant);
        log::debug!(
            "[SESSION] {} turn {} recorded at {} (opened {})",
            session.id(),
            session.turn_count(),
            at,
            session.created_at()
        );
    }

    /// Wait for the conversation's lane, then hand out exclusive access
    pub async fn begin_turn(&self, conversation_id: &str) -> SessionTurn {
        let lane = self.lanes.acquire(conversation_id).await;
        SessionTurn {
            session: self.get_or_create(conversation_id),
            _lane: lane,
        }
    }

    pub fn is_busy(&self, conversation_id: &str) -> bool {
        self.lanes.is_busy(conversation_id)
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn stats(&self) -> SessionStats {
        let lanes = self.lanes.stats();
        SessionStats {
            total_sessions: self.len(),
            busy_sessions: lanes.active_lanes,
            turns_processed: lanes.total_turns,
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
