//! Scripted agents for exercising the dispatch core without a network.

use super::{AgentOutcome, AgentProxy, Task};
use crate::ai::ErrorKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    Fail(ErrorKind),
    /// Never answers on its own; the caller's deadline decides
    Hang,
}

pub struct ScriptedAgent {
    name: String,
    delay: Duration,
    script: Script,
    late_reply: Mutex<Option<String>>,
    invocations: AtomicUsize,
    follow_ups: AtomicUsize,
    releases: AtomicUsize,
    started: Mutex<Vec<Instant>>,
    released_all_at: Mutex<Option<Instant>>,
}

impl ScriptedAgent {
    pub fn replying(name: &str, text: &str, delay: Duration) -> Self {
        Self::new(name, Script::Reply(text.to_string()), delay)
    }

    pub fn failing(name: &str, kind: ErrorKind) -> Self {
        Self::new(name, Script::Fail(kind), Duration::ZERO)
    }

    pub fn hanging(name: &str) -> Self {
        Self::new(name, Script::Hang, Duration::ZERO)
    }

    pub fn new(name: &str, script: Script, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
            script,
            late_reply: Mutex::new(None),
            invocations: AtomicUsize::new(0),
            follow_ups: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            released_all_at: Mutex::new(None),
        }
    }

    /// Text returned by the first follow-up read after a timeout
    pub fn with_late_reply(self, text: &str) -> Self {
        *self.late_reply.lock() = Some(text.to_string());
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn follow_ups(&self) -> usize {
        self.follow_ups.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn start_times(&self) -> Vec<Instant> {
        self.started.lock().clone()
    }

    /// When `release_all` was called, if it was
    pub fn released_all_at(&self) -> Option<Instant> {
        *self.released_all_at.lock()
    }
}

#[async_trait]
impl AgentProxy for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _task: &Task, deadline: Duration) -> AgentOutcome {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.started.lock().push(Instant::now());

        let work = async {
            tokio::time::sleep(self.delay).await;
            match &self.script {
                Script::Reply(text) => AgentOutcome::Success {
                    agent_name: self.name.clone(),
                    text: text.clone(),
                },
                Script::Fail(kind) => AgentOutcome::Failure {
                    agent_name: self.name.clone(),
                    kind: *kind,
                },
                Script::Hang => std::future::pending().await,
            }
        };

        match tokio::time::timeout(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => AgentOutcome::Timeout { agent_name: self.name.clone() },
        }
    }

    async fn follow_up(&self, _task: &Task) -> Option<AgentOutcome> {
        self.follow_ups.fetch_add(1, Ordering::SeqCst);
        self.late_reply.lock().take().map(|text| AgentOutcome::Success {
            agent_name: self.name.clone(),
            text,
        })
    }

    fn release(&self, _task: &Task) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn release_all(&self) {
        *self.released_all_at.lock() = Some(Instant::now());
    }
}
