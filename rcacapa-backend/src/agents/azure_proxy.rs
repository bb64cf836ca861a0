//! Agent proxy backed by a hosted agent on the agent service.
//!
//! One invocation = one thread: post the task, start a run, poll it with
//! bounded exponential backoff, read the assistant's answer. Polling stays
//! inside this module; callers only see [`AgentOutcome`]s.

use super::service::{AgentDefinition, AgentServiceClient, Run, RunStatus};
use super::{AgentOutcome, AgentProxy, Task};
use crate::ai::AiError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// First delay between run status reads
const POLL_INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Ceiling for the run status backoff
const POLL_MAX_DELAY: Duration = Duration::from_secs(4);

/// Remote work submitted for a task that has not been cleaned up yet
#[derive(Debug, Clone)]
struct PendingRun {
    thread_id: String,
    run_id: Option<String>,
}

pub struct AzureAgentProxy {
    service: Arc<AgentServiceClient>,
    definition: AgentDefinition,
    name: String,
    pending: DashMap<Uuid, PendingRun>,
    background: TaskTracker,
}

/// Next delay of the run status backoff
fn next_poll_delay(current: Duration) -> Duration {
    (current * 2).min(POLL_MAX_DELAY)
}

/// Map a terminal run to the error it represents, if any
fn run_error(run: &Run) -> Option<AiError> {
    let detail = run
        .last_error
        .as_ref()
        .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
        .unwrap_or_else(|| "no detail".to_string());

    match run.status {
        RunStatus::Completed => None,
        RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired => Some(AiError::permanent(
            format!("Run {} ended as {:?}: {}", run.id, run.status, detail),
        )),
        RunStatus::RequiresAction => Some(AiError::protocol(format!(
            "Run {} requires client-side tool output, which is not supported",
            run.id
        ))),
        _ => Some(AiError::protocol(format!(
            "Run {} reported unexpected status {:?}",
            run.id, run.status
        ))),
    }
}

/// Polling can stop: either the run is done or it waits on us
fn is_settled(status: RunStatus) -> bool {
    status.is_terminal() || status == RunStatus::RequiresAction
}

impl AzureAgentProxy {
    pub fn new(
        service: Arc<AgentServiceClient>,
        definition: AgentDefinition,
        background: TaskTracker,
    ) -> Self {
        let name = definition.display_name().to_string();
        Self {
            service,
            definition,
            name,
            pending: DashMap::new(),
            background,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.definition.id
    }

    async fn run_to_completion(&self, task: &Task) -> Result<String, AiError> {
        let thread = self.service.create_thread().await?;
        self.pending.insert(
            task.id(),
            PendingRun { thread_id: thread.id.clone(), run_id: None },
        );

        let result = self.run_on_thread(task, &thread.id).await;
        // Reached only when the run settled before the deadline
        self.discard(task.id(), false);
        result
    }

    async fn run_on_thread(&self, task: &Task, thread_id: &str) -> Result<String, AiError> {
        self.service.create_message(thread_id, task.text()).await?;
        let mut run = self.service.create_run(thread_id, self.agent_id()).await?;

        if let Some(mut entry) = self.pending.get_mut(&task.id()) {
            entry.run_id = Some(run.id.clone());
        }

        let mut delay = POLL_INITIAL_DELAY;
        while !is_settled(run.status) {
            tokio::time::sleep(delay).await;
            delay = next_poll_delay(delay);
            run = self.service.get_run(thread_id, &run.id).await?;
            log::debug!("[AGENT] {} run {} status {:?}", self.name, run.id, run.status);
        }

        self.read_answer(thread_id, &run).await
    }

    async fn read_answer(&self, thread_id: &str, run: &Run) -> Result<String, AiError> {
        if let Some(err) = run_error(run) {
            return Err(err);
        }
        self.service.latest_assistant_text(thread_id, &run.id).await
    }

    fn outcome_from(&self, result: Result<String, AiError>) -> AgentOutcome {
        match result {
            Ok(text) => AgentOutcome::Success { agent_name: self.name.clone(), text },
            Err(e) => {
                log::warn!("[AGENT] {} failed ({}): {}", self.name, e.kind, e);
                AgentOutcome::Failure { agent_name: self.name.clone(), kind: e.kind }
            }
        }
    }

    /// Forget the pending work for `task_id` and delete its thread in the
    /// background, cancelling the run first when asked to.
    fn discard(&self, task_id: Uuid, cancel_run: bool) {
        let Some((_, pending)) = self.pending.remove(&task_id) else {
            return;
        };

        let service = Arc::clone(&self.service);
        let name = self.name.clone();
        self.background.spawn(async move {
            if cancel_run {
                if let Some(run_id) = pending.run_id.as_deref() {
                    if let Err(e) = service.cancel_run(&pending.thread_id, run_id).await {
                        log::debug!("[AGENT] {} could not cancel run {}: {}", name, run_id, e);
                    }
                }
            }
            if let Err(e) = service.delete_thread(&pending.thread_id).await {
                log::warn!("[AGENT] {} could not delete thread {}: {}", name, pending.thread_id, e);
            }
        });
    }

}

#[async_trait]
impl AgentProxy for AzureAgentProxy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, task: &Task, deadline: Duration) -> AgentOutcome {
        let started = Instant::now();
        match timeout(deadline, self.run_to_completion(task)).await {
            Ok(result) => {
                log::info!(
                    "[AGENT] {} settled task {} in {}ms",
                    self.name,
                    task.id(),
                    started.elapsed().as_millis()
                );
                self.outcome_from(result)
            }
            Err(_) => {
                log::warn!(
                    "[AGENT] {} timed out on task {} after {}ms",
                    self.name,
                    task.id(),
                    deadline.as_millis()
                );
                AgentOutcome::Timeout { agent_name: self.name.clone() }
            }
        }
    }

    async fn follow_up(&self, task: &Task) -> Option<AgentOutcome> {
        let pending = self.pending.get(&task.id()).map(|e| e.value().clone())?;
        let run_id = pending.run_id?;

        let run = match self.service.get_run(&pending.thread_id, &run_id).await {
            Ok(run) => run,
            Err(e) => {
                log::debug!("[AGENT] {} follow-up read failed: {}", self.name, e);
                return None;
            }
        };
        if !is_settled(run.status) {
            return None;
        }

        let result = self.read_answer(&pending.thread_id, &run).await;
        self.discard(task.id(), false);
        Some(self.outcome_from(result))
    }

    fn release(&self, task: &Task) {
        self.discard(task.id(), true);
    }

    fn release_all(&self) {
        let ids: Vec<Uuid> = self.pending.iter().map(|e| *e.key()).collect();
        if !ids.is_empty() {
            log::info!("[AGENT] {} releasing {} pending runs", self.name, ids.len());
        }
        for id in ids {
            self.discard(id, true);
        }
    }
}
