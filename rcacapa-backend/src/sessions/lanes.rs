//! Conversation Lane Serialization
//!
//! One lane per conversation id serializes turns so that two requests for
//! the same conversation never interleave:
//! - only one dispatch round per conversation is in flight
//! - turn appends land in request order
//! - different conversations never wait on each other
//!
//! Lanes are FIFO: a waiting request acquires the lane in arrival order.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Maximum time a lane can be held before warning
const LANE_HOLD_WARNING_SECS: u64 = 60;

/// Guard that releases the conversation lane when dropped
pub struct LaneGuard {
    conversation_id: String,
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        let held = self.acquired_at.elapsed();
        if held.as_secs() > LANE_HOLD_WARNING_SECS {
            log::warn!(
                "[SESSION] Conversation {} lane held for {} seconds (unusually long)",
                self.conversation_id,
                held.as_secs()
            );
        }
    }
}

/// Manages one lane per conversation id
pub struct LaneManager {
    /// One semaphore per conversation - permits = 1 means only one turn at a time
    lanes: DashMap<String, Arc<Semaphore>>,
    total_turns: AtomicU64,
}

impl LaneManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the lane for exclusive access.
    ///
    /// Waits while another turn of the same conversation is running.
    pub async fn acquire(&self, conversation_id: &str) -> LaneGuard {
        loop {
            let semaphore = self.get_or_create_lane(conversation_id);
            match semaphore.acquire_owned().await {
                Ok(permit) => {
                    self.total_turns.fetch_add(1, Ordering::Relaxed);
                    return LaneGuard {
                        conversation_id: conversation_id.to_string(),
                        _permit: permit,
                        acquired_at: Instant::now(),
                    };
                }
                // Lanes are never closed; a closed one is replaced
                Err(_) => {
                    log::error!("[SESSION] Lane for {} was closed; recreating", conversation_id);
                    self.lanes.remove(conversation_id);
                }
            }
        }
    }

    /// Check if a conversation currently has a turn in flight
    pub fn is_busy(&self, conversation_id: &str) -> bool {
        self.lanes
            .get(conversation_id)
            .map(|s| s.available_permits() == 0)
            .unwrap_or(false)
    }

    pub fn stats(&self) -> LaneStats {
        LaneStats {
            active_lanes: self.lanes.iter().filter(|e| e.available_permits() == 0).count(),
            total_turns: self.total_turns.load(Ordering::Relaxed),
        }
    }

    fn get_or_create_lane(&self, conversation_id: &str) -> Arc<Semaphore> {
        self.lanes
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}

impl Default for LaneManager {
    fn default() -> Self {
        Self {
            lanes: DashMap::new(),
            total_turns: AtomicU64::new(0),
        }
    }
}

/// Statistics about conversation lanes
#[derive(Debug, Clone)]
pub struct LaneStats {
    /// Lanes with a turn in flight
    pub active_lanes: usize,
    /// Turns that have acquired a lane since startup
    pub total_turns: u64,
}
