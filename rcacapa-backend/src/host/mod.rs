//! Host router
//!
//! Entry point for every user message. Each turn is classified once and then
//! either answered directly (greetings) or delegated to the agents through
//! the `analyse_task` tool:
//!
//! ```text
//! Idle → Classifying ─┬─ DirectReply ─┬→ Responding → Idle
//!                     └─ Delegating  ─┘
//! ```
//!
//! A delegated reply is returned exactly as the aggregator produced it.

mod classifier;
mod tool;

pub use classifier::{build_classifier, Classifier, ClassifierMode, Intent};
pub use tool::{AnalyseTaskTool, GracePolicy};

#[cfg(test)]
pub use classifier::{GreetingHeuristic, PredicateClassifier};

use crate::agents::{DispatchError, Task};
use crate::ai::streaming::{chunk_text, create_default_stream_channel, StreamEvent, StreamReceiver};
use crate::ai::{ChatModel, Message};
use crate::sessions::{Session, SessionStore};
use std::fmt;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// Fixed greeting used when no host model is available or it fails
pub const DEFAULT_GREETING: &str =
    "Hello! I can help with compliance checks and root cause analysis. What would you like me to look into?";

/// Returned when no agent answered yet but the work may still complete
pub const STILL_PROCESSING_REPLY: &str =
    "The agents are still processing your request. Please try again in a moment.";

/// The only error text a client ever sees
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error while processing the request.";

const GREETING_INSTRUCTIONS: &str = "You are the front desk of a pharmaceutical compliance and \
root cause analysis assistant. The user sent a greeting or small talk. Reply with one or two \
friendly sentences and invite them to describe what they need analysed. Do not answer any \
technical question yourself.";

/// Phase of the turn a session is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    Classifying,
    DirectReply,
    Delegating,
    Responding,
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RouterState::Idle => "idle",
            RouterState::Classifying => "classifying",
            RouterState::DirectReply => "direct_reply",
            RouterState::Delegating => "delegating",
            RouterState::Responding => "responding",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("no agent produced an answer: {0}")]
    AgentsFailed(String),
    #[error("service is shutting down")]
    ShuttingDown,
}

impl RouterError {
    /// Client-facing text; never carries internal detail
    pub fn public_message(&self) -> &'static str {
        INTERNAL_ERROR_MESSAGE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Direct,
    Delegated,
    /// Nothing usable yet, every miss was transient
    StillProcessing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub kind: ReplyKind,
}

pub struct HostRouter {
    classifier: Arc<dyn Classifier>,
    tool: Arc<AnalyseTaskTool>,
    sessions: Arc<SessionStore>,
    chat_model: Option<Arc<dyn ChatModel>>,
    in_flight: TaskTracker,
}

impl HostRouter {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        tool: Arc<AnalyseTaskTool>,
        sessions: Arc<SessionStore>,
        chat_model: Option<Arc<dyn ChatModel>>,
        in_flight: TaskTracker,
    ) -> Self {
        Self {
            classifier,
            tool,
            sessions,
            chat_model,
            in_flight,
        }
    }

    #[cfg(test)]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one user message for `conversation_id`.
    ///
    /// Turns of the same conversation run one after another; the reply is
    /// appended to the session before the next turn may start.
    pub async fn respond(&self, conversation_id: &str, user_query: &str) -> Result<Reply, RouterError> {
        if self.in_flight.is_closed() {
            return Err(RouterError::ShuttingDown);
        }

        if self.sessions.is_busy(conversation_id) {
            log::debug!("[HOST] Conversation {} busy, queuing turn", conversation_id);
        }
        let turn = self.sessions.begin_turn(conversation_id).await;
        // Shutdown may have started while this turn waited for the lane
        if self.in_flight.is_closed() {
            return Err(RouterError::ShuttingDown);
        }
        let reply = self.run_turn(turn.session(), user_query).await?;
        self.sessions.append_turn(turn.session(), user_query, &reply.text);
        drop(turn);

        log::info!(
            "[HOST] Conversation {} answered ({:?}, {} chars)",
            conversation_id,
            reply.kind,
            reply.text.len()
        );
        Ok(reply)
    }

    async fn run_turn(&self, session: &Session, user_query: &str) -> Result<Reply, RouterError> {
        session.set_state(RouterState::Classifying);
        let intent = self.classifier.classify(user_query).await;

        let reply = match intent {
            Intent::Greeting => {
                session.set_state(RouterState::DirectReply);
                Reply {
                    text: self.greeting_reply(session, user_query).await,
                    kind: ReplyKind::Direct,
                }
            }
            Intent::Task => {
                session.set_state(RouterState::Delegating);
                self.delegate(session, user_query).await?
            }
        };

        session.set_state(RouterState::Responding);
        Ok(reply)
    }

    async fn delegate(&self, session: &Session, user_query: &str) -> Result<Reply, RouterError> {
        let task = Task::new(user_query);
        log::info!("[HOST] Conversation {} delegating as task {}", session.id(), task.id());

        let output = self.in_flight.track_future(self.tool.call(&task)).await?;

        if !output.reply.total_failure {
            return Ok(Reply { text: output.reply.text, kind: ReplyKind::Delegated });
        }

        if output.result.all_transient() {
            log::warn!("[HOST] Task {} produced no answer yet; asking the user to retry", task.id());
            return Ok(Reply {
                text: STILL_PROCESSING_REPLY.to_string(),
                kind: ReplyKind::StillProcessing,
            });
        }

        let detail = output
            .result
            .outcomes
            .iter()
            .map(|o| o.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(RouterError::AgentsFailed(detail))
    }

    async fn greeting_reply(&self, session: &Session, user_query: &str) -> String {
        let Some(model) = &self.chat_model else {
            return DEFAULT_GREETING.to_string();
        };

        let mut messages = vec![Message::system(GREETING_INSTRUCTIONS)];
        messages.extend(session.history());
        messages.push(Message::user(user_query));

        match model.generate_text(messages).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => DEFAULT_GREETING.to_string(),
            Err(e) => {
                log::warn!("[HOST] Greeting generation failed, using default: {}", e);
                DEFAULT_GREETING.to_string()
            }
        }
    }

    /// Same reply as [`HostRouter::respond`], delivered as stream events.
    ///
    /// The reply is produced in full first, then emitted in chunks whose
    /// concatenation equals the buffered text.
    pub fn respond_stream(self: &Arc<Self>, conversation_id: String, user_query: String) -> StreamReceiver {
        let (tx, rx) = create_default_stream_channel();
        let router = Arc::clone(self);

        tokio::spawn(async move {
            match router.respond(&conversation_id, &user_query).await {
                Ok(reply) => {
                    for chunk in chunk_text(&reply.text) {
                        let event = StreamEvent::Delta { content: chunk.to_string() };
                        if tx.send(event).await.is_err() {
                            log::debug!("[HOST] Stream receiver for {} went away", conversation_id);
                            return;
                        }
                    }
                    let _ = tx.send(StreamEvent::Done).await;
                }
                Err(e) => {
                    log::error!("[HOST] Streamed turn for {} failed: {}", conversation_id, e);
                    let _ = tx
                        .send(StreamEvent::Error { message: e.public_message().to_string() })
                        .await;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::mock::ScriptedAgent;
    use crate::agents::{BoxedAgent, Dispatcher};
    use crate::ai::mock::MockChatModel;
    use crate::ai::streaming::StreamAccumulator;
    use crate::ai::ErrorKind;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn router_with(
        agents: Vec<BoxedAgent>,
        classifier: Arc<dyn Classifier>,
        chat_model: Option<Arc<dyn ChatModel>>,
    ) -> Arc<HostRouter> {
        let dispatcher = Arc::new(Dispatcher::new(agents, ms(500), ms(50)).unwrap());
        let tool = Arc::new(AnalyseTaskTool::new(
            dispatcher,
            GracePolicy { attempts: 1, interval: ms(100) },
        ));
        Arc::new(HostRouter::new(
            classifier,
            tool,
            Arc::new(SessionStore::new()),
            chat_model,
            TaskTracker::new(),
        ))
    }

    fn router(agents: Vec<BoxedAgent>) -> Arc<HostRouter> {
        router_with(agents, Arc::new(GreetingHeuristic), None)
    }

    #[tokio::test(start_paused = true)]
    async fn greeting_is_answered_without_dispatch() {
        let agent1 = Arc::new(ScriptedAgent::replying("Agent1", "T1", ms(10)));
        let agent2 = Arc::new(ScriptedAgent::replying("Agent2", "T2", ms(10)));
        let router = router_with(
            vec![agent1.clone() as BoxedAgent, agent2.clone() as BoxedAgent],
            Arc::new(PredicateClassifier(|t: &str| t == "Hello")),
            None,
        );

        let reply = router.respond("c1", "Hello").await.unwrap();

        assert_eq!(reply.kind, ReplyKind::Direct);
        assert_eq!(reply.text, DEFAULT_GREETING);
        assert_eq!(agent1.invocations(), 0);
        assert_eq!(agent2.invocations(), 0);
        assert_eq!(router.sessions().get("c1").unwrap().turn_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn greeting_uses_host_model_with_history() {
        let agent = Arc::new(ScriptedAgent::replying("Agent1", "T1", ms(10)));
        let model = Arc::new(MockChatModel::new(vec![
            Ok("Hi! What should I analyse?".to_string()),
            Err(crate::ai::AiError::new("unavailable")),
        ]));
        let router = router_with(vec![agent.clone() as BoxedAgent], Arc::new(GreetingHeuristic), Some(model.clone()));

        let first = router.respond("c1", "Hello").await.unwrap();
        assert_eq!(first.text, "Hi! What should I analyse?");

        let second = router.respond("c1", "thanks").await.unwrap();
        assert_eq!(second.text, DEFAULT_GREETING);

        let calls = model.calls();
        // system + previous user/assistant pair + new user message
        assert_eq!(calls[1].len(), 4);
        assert_eq!(calls[1][2].content, "Hi! What should I analyse?");
        assert_eq!(agent.invocations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delegated_reply_is_verbatim() {
        let router = router(vec![
            Arc::new(ScriptedAgent::replying("Agent1", "T1", ms(30))),
            Arc::new(ScriptedAgent::replying("Agent2", "T2", ms(10))),
        ]);

        let reply = router.respond("c1", "check compliance of batch X").await.unwrap();

        assert_eq!(reply.kind, ReplyKind::Delegated);
        assert_eq!(reply.text, "Agent1:\nT1\n\nAgent2:\nT2");
        let session = router.sessions().get("c1").unwrap();
        assert_eq!(session.turns()[0].assistant, reply.text);
        assert_eq!(session.state(), RouterState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_agent_is_named_in_caveat() {
        let router = router(vec![
            Arc::new(ScriptedAgent::replying("Agent1", "T1", ms(10))),
            Arc::new(ScriptedAgent::hanging("Agent2")),
        ]);

        let reply = router.respond("c1", "check compliance of batch X").await.unwrap();

        assert_eq!(
            reply.text,
            "Agent1:\nT1\n\nNote: this answer is incomplete. No response from: Agent2 (timed out)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_total_failure_asks_to_retry() {
        let router = router(vec![
            Arc::new(ScriptedAgent::hanging("Agent1")),
            Arc::new(ScriptedAgent::failing("Agent2", ErrorKind::Transient)),
        ]);

        let reply = router.respond("c1", "check batch X").await.unwrap();

        assert_eq!(reply.kind, ReplyKind::StillProcessing);
        assert_eq!(reply.text, STILL_PROCESSING_REPLY);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_total_failure_is_an_error() {
        let router = router(vec![
            Arc::new(ScriptedAgent::failing("Agent1", ErrorKind::Permanent)),
            Arc::new(ScriptedAgent::hanging("Agent2")),
        ]);

        let err = router.respond("c1", "check batch X").await.unwrap_err();

        assert!(matches!(err, RouterError::AgentsFailed(_)));
        assert_eq!(err.public_message(), INTERNAL_ERROR_MESSAGE);
        let session = router.sessions().get("c1").unwrap();
        assert_eq!(session.turn_count(), 0);
        assert_eq!(session.state(), RouterState::Idle);
        assert!(!router.sessions().is_busy("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn same_conversation_rounds_do_not_overlap() {
        let agent = Arc::new(ScriptedAgent::replying("Agent1", "T1", ms(100)));
        let router = router(vec![agent.clone() as BoxedAgent]);

        let a = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.respond("c1", "first query").await })
        };
        let b = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.respond("c1", "second query").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let starts = agent.start_times();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] - starts[0] >= ms(100));
        assert_eq!(router.sessions().get("c1").unwrap().turn_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn different_conversations_run_in_parallel() {
        let agent = Arc::new(ScriptedAgent::replying("Agent1", "T1", ms(100)));
        let router = router(vec![agent.clone() as BoxedAgent]);

        let a = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.respond("c1", "query").await })
        };
        let b = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.respond("c2", "query").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let starts = agent.start_times();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] - starts[0] < ms(100));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_concatenates_to_buffered_reply() {
        let agents = || -> Vec<BoxedAgent> {
            vec![
                Arc::new(ScriptedAgent::replying("Agent1", "Batch X is compliant.\n- line one", ms(10))),
                Arc::new(ScriptedAgent::hanging("Agent2")),
            ]
        };
        let buffered = router(agents()).respond("c1", "check batch X").await.unwrap();

        let mut rx = router(agents()).respond_stream("c1".to_string(), "check batch X".to_string());
        let mut acc = StreamAccumulator::new();
        let mut deltas = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, StreamEvent::Delta { .. }) {
                deltas += 1;
            }
            acc.process_event(event);
        }

        assert!(acc.done);
        assert!(acc.error.is_none());
        assert!(deltas > 1);
        assert_eq!(acc.content, buffered.text);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_error_is_generic() {
        let router = router(vec![Arc::new(ScriptedAgent::failing("Agent1", ErrorKind::Protocol))]);

        let mut rx = router.respond_stream("c1".to_string(), "check batch X".to_string());
        let mut acc = StreamAccumulator::new();
        while let Some(event) = rx.recv().await {
            acc.process_event(event);
        }

        assert_eq!(acc.error.as_deref(), Some(INTERNAL_ERROR_MESSAGE));
        assert!(acc.content.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn turn_queued_behind_lane_is_rejected_after_close() {
        let agent = Arc::new(ScriptedAgent::replying("Agent1", "T1", ms(1)));
        let router = router(vec![agent.clone() as BoxedAgent]);
        let holder = router.sessions().begin_turn("c1").await;

        let queued = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.respond("c1", "check batch X").await })
        };
        tokio::time::sleep(ms(10)).await;
        assert!(!queued.is_finished());

        router.in_flight.close();
        drop(holder);

        let err = queued.await.unwrap().unwrap_err();
        assert!(matches!(err, RouterError::ShuttingDown));
        assert_eq!(agent.invocations(), 0);
        assert_eq!(router.sessions().get("c1").unwrap().turn_count(), 0);
    }

    #[tokio::test]
    async fn closed_tracker_rejects_new_turns() {
        let router = router(vec![Arc::new(ScriptedAgent::replying("Agent1", "T1", ms(1)))]);
        router.in_flight.close();

        let err = router.respond("c1", "check batch X").await.unwrap_err();
        assert!(matches!(err, RouterError::ShuttingDown));
    }
}
