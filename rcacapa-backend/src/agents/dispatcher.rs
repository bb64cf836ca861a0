//! Concurrent dispatch of one task to every registered agent.
//!
//! All invocations start together and share one wall-clock deadline. Outcomes
//! are reported in registration order, never completion order, so the
//! aggregated reply does not depend on network jitter.

use super::{AgentOutcome, BoxedAgent, Task};
use futures_util::future::join_all;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};

/// Upper bound for a single follow-up read of already-submitted work
const FOLLOW_UP_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no agents registered for dispatch")]
    NoAgents,
}

/// Outcomes of one dispatch round, one per agent, in registration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub outcomes: Vec<AgentOutcome>,
    /// Set when the overall deadline fired before every agent settled
    pub deadline_hit: bool,
}

impl DispatchResult {
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn has_success(&self) -> bool {
        self.outcomes.iter().any(AgentOutcome::is_success)
    }

    /// True when no agent answered and every miss may still resolve later
    pub fn all_transient(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(AgentOutcome::is_transient)
    }
}

/// Per-agent budget: the overall deadline minus a margin left for aggregation
pub fn agent_deadline(overall: Duration, margin: Duration) -> Duration {
    let budget = overall.saturating_sub(margin);
    if budget.is_zero() { overall } else { budget }
}

/// Invoke every agent in parallel and collect their outcomes.
///
/// Returns once all agents have settled or `overall` has elapsed; an agent
/// still pending at that point is recorded as `Timeout` and its call is
/// dropped. Agent failures are never raised; the only error is an empty
/// agent set.
pub async fn dispatch(
    task: &Task,
    agents: &[BoxedAgent],
    overall: Duration,
    margin: Duration,
) -> Result<DispatchResult, DispatchError> {
    if agents.is_empty() {
        return Err(DispatchError::NoAgents);
    }

    let started = Instant::now();
    let deadline_at = started + overall;
    let per_agent = agent_deadline(overall, margin);

    log::info!(
        "[DISPATCH] Task {} → {} agents (deadline {}ms, per-agent {}ms)",
        task.id(),
        agents.len(),
        overall.as_millis(),
        per_agent.as_millis()
    );

    let calls = agents.iter().map(|agent| async move {
        match timeout_at(deadline_at, agent.invoke(task, per_agent)).await {
            Ok(outcome) => (outcome, false),
            Err(_) => {
                log::warn!(
                    "[DISPATCH] Agent {} still pending at the round deadline, abandoning",
                    agent.name()
                );
                (AgentOutcome::Timeout { agent_name: agent.name().to_string() }, true)
            }
        }
    });

    let settled = join_all(calls).await;
    let deadline_hit = settled.iter().any(|(_, forced)| *forced);
    let outcomes: Vec<AgentOutcome> = settled.into_iter().map(|(outcome, _)| outcome).collect();

    let result = DispatchResult { outcomes, deadline_hit };

    for outcome in &result.outcomes {
        log::debug!("[DISPATCH] Task {} outcome: {}", task.id(), outcome);
    }
    log::info!(
        "[DISPATCH] Task {} settled in {}ms: {}/{} succeeded{}",
        task.id(),
        started.elapsed().as_millis(),
        result.success_count(),
        result.outcomes.len(),
        if deadline_hit { " (deadline hit)" } else { "" }
    );

    Ok(result)
}

/// The registered agent set plus its round budget
pub struct Dispatcher {
    agents: Vec<BoxedAgent>,
    overall_deadline: Duration,
    margin: Duration,
}

impl Dispatcher {
    pub fn new(
        agents: Vec<BoxedAgent>,
        overall_deadline: Duration,
        margin: Duration,
    ) -> Result<Self, DispatchError> {
        if agents.is_empty() {
            return Err(DispatchError::NoAgents);
        }
        Ok(Self { agents, overall_deadline, margin })
    }

    pub async fn dispatch(&self, task: &Task) -> Result<DispatchResult, DispatchError> {
        dispatch(task, &self.agents, self.overall_deadline, self.margin).await
    }

    /// Read once more from every agent whose outcome may still resolve.
    ///
    /// Replaces outcomes in place, so registration order is kept. Returns the
    /// number of agents that turned into `Success`. Nothing is resubmitted.
    pub async fn follow_up(&self, task: &Task, result: &mut DispatchResult) -> usize {
        let pending: Vec<usize> = result
            .outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_transient())
            .map(|(i, _)| i)
            .collect();

        let reads = pending.into_iter().filter_map(|i| {
            self.agents.get(i).map(|agent| async move {
                match timeout(FOLLOW_UP_READ_TIMEOUT, agent.follow_up(task)).await {
                    Ok(late) => (i, late),
                    Err(_) => (i, None),
                }
            })
        });

        let mut recovered = 0;
        for (i, late) in join_all(reads).await {
            if let Some(outcome) = late {
                if outcome.is_success() {
                    log::info!("[DISPATCH] Late answer recovered from {}", outcome.agent_name());
                    recovered += 1;
                }
                result.outcomes[i] = outcome;
            }
        }
        recovered
    }

    /// Best-effort cleanup of any remote work still held for `task`
    pub fn release(&self, task: &Task) {
        for agent in &self.agents {
            agent.release(task);
        }
    }
}
