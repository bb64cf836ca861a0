//! `analyse_task`: the single boundary through which the host reaches the agents.

use crate::agents::{aggregate, AggregatedReply, DispatchError, DispatchResult, Dispatcher, Task};
use std::sync::Arc;
use std::time::Duration;

const TOOL_NAME: &str = "analyse_task";

/// Follow-up reads after a round that produced no answer at all
#[derive(Debug, Clone, Copy)]
pub struct GracePolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for GracePolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub result: DispatchResult,
    pub reply: AggregatedReply,
}

/// Releases the task's remote work when dropped, including when the caller
/// abandons `call` mid-dispatch.
struct ReleaseOnDrop<'a> {
    dispatcher: &'a Dispatcher,
    task: &'a Task,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.dispatcher.release(self.task);
    }
}

pub struct AnalyseTaskTool {
    dispatcher: Arc<Dispatcher>,
    grace: GracePolicy,
}

impl AnalyseTaskTool {
    pub fn new(dispatcher: Arc<Dispatcher>, grace: GracePolicy) -> Self {
        Self { dispatcher, grace }
    }

    /// Dispatch, give late answers a bounded second chance, clean up, merge.
    pub async fn call(&self, task: &Task) -> Result<AnalysisOutput, DispatchError> {
        log::info!("[HOST] Calling {} for task {}", TOOL_NAME, task.id());

        let release = ReleaseOnDrop { dispatcher: &self.dispatcher, task };
        let mut result = self.dispatcher.dispatch(task).await?;
        if !result.has_success() {
            self.grace_reads(task, &mut result).await;
        }
        drop(release);

        let reply = aggregate(&result);
        Ok(AnalysisOutput { result, reply })
    }

    async fn grace_reads(&self, task: &Task, result: &mut DispatchResult) {
        for attempt in 1..=self.grace.attempts {
            if !result.outcomes.iter().any(|o| o.is_transient()) {
                return;
            }
            log::info!(
                "[HOST] No answers for task {}, follow-up read {}/{} in {}ms",
                task.id(),
                attempt,
                self.grace.attempts,
                self.grace.interval.as_millis()
            );
            tokio::time::sleep(self.grace.interval).await;

            if self.dispatcher.follow_up(task, result).await > 0 {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::mock::ScriptedAgent;
    use crate::agents::BoxedAgent;
    use crate::ai::ErrorKind;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn tool(agents: Vec<BoxedAgent>, attempts: u32) -> AnalyseTaskTool {
        let dispatcher = Arc::new(Dispatcher::new(agents, ms(500), ms(50)).unwrap());
        AnalyseTaskTool::new(dispatcher, GracePolicy { attempts, interval: ms(100) })
    }

    #[tokio::test(start_paused = true)]
    async fn late_answer_is_recovered_without_resubmitting() {
        let agent1 = Arc::new(ScriptedAgent::hanging("Agent1").with_late_reply("T1"));
        let agent2 = Arc::new(ScriptedAgent::hanging("Agent2"));
        let tool = tool(vec![agent1.clone() as BoxedAgent, agent2.clone() as BoxedAgent], 3);

        let output = tool.call(&Task::new("check batch X")).await.unwrap();

        assert_eq!(output.reply.text, "Agent1:\nT1\n\nNote: this answer is incomplete. No response from: Agent2 (timed out)");
        assert_eq!(agent1.invocations(), 1);
        assert_eq!(agent2.invocations(), 1);
        // Recovered on the first read, so no second attempt
        assert_eq!(agent2.follow_ups(), 1);
        assert_eq!(agent1.releases(), 1);
        assert_eq!(agent2.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_reads_are_bounded() {
        let agent = Arc::new(ScriptedAgent::hanging("Agent1"));
        let tool = tool(vec![agent.clone() as BoxedAgent], 2);

        let output = tool.call(&Task::new("q")).await.unwrap();

        assert!(output.reply.total_failure);
        assert!(output.result.all_transient());
        assert_eq!(agent.follow_ups(), 2);
        assert_eq!(agent.invocations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_grace_when_something_answered() {
        let ok = Arc::new(ScriptedAgent::replying("Agent1", "T1", ms(10)));
        let slow = Arc::new(ScriptedAgent::hanging("Agent2").with_late_reply("late"));
        let tool = tool(vec![ok.clone() as BoxedAgent, slow.clone() as BoxedAgent], 2);

        let output = tool.call(&Task::new("q")).await.unwrap();

        assert_eq!(output.result.success_count(), 1);
        assert_eq!(slow.follow_ups(), 0);
        assert_eq!(slow.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_call_still_releases_submitted_work() {
        let agent = Arc::new(ScriptedAgent::hanging("Agent1"));
        let tool = tool(vec![agent.clone() as BoxedAgent], 2);

        let abandoned = tokio::time::timeout(ms(100), tool.call(&Task::new("q"))).await;

        assert!(abandoned.is_err());
        assert_eq!(agent.invocations(), 1);
        assert_eq!(agent.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_skip_grace() {
        let agent = Arc::new(ScriptedAgent::failing("Agent1", ErrorKind::Permanent));
        let tool = tool(vec![agent.clone() as BoxedAgent], 2);

        let output = tool.call(&Task::new("q")).await.unwrap();

        assert!(output.reply.total_failure);
        assert_eq!(agent.follow_ups(), 0);
    }
}
