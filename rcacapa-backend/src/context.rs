//! Process-wide resources, acquired once at startup and released once at shutdown.
//!
//! Acquisition order: HTTP client → agent service client → agent definitions
//! → proxies → dispatcher → host router. Shutdown waits for in-flight turns
//! before releasing remote work, in reverse order.

use crate::agents::{AgentServiceClient, AzureAgentProxy, BoxedAgent, DispatchError, Dispatcher};
use crate::ai::{AiError, AzureChatClient, ChatModel};
use crate::config::Config;
use crate::host::{build_classifier, AnalyseTaskTool, GracePolicy, HostRouter};
use crate::http::build_shared_client;
use crate::sessions::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid client configuration: {0}")]
    Client(String),
    #[error("could not resolve agent {id}: {source}")]
    Agent { id: String, source: AiError },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub struct AppContext {
    pub router: Arc<HostRouter>,
    pub sessions: Arc<SessionStore>,
    agents: Vec<BoxedAgent>,
    /// Dispatch rounds started by request handlers
    in_flight: TaskTracker,
    /// Run cancellation and thread cleanup spawned by the proxies
    background: TaskTracker,
    drain: Duration,
}

impl AppContext {
    pub async fn init(config: &Config) -> Result<Self, ContextError> {
        let client = build_shared_client()?;

        let service = Arc::new(
            AgentServiceClient::new(
                client.clone(),
                &config.project.agents_base_url(),
                &config.project_access_token,
                &config.agents_api_version,
            )
            .map_err(ContextError::Client)?,
        );
        log::info!(
            "[LIFECYCLE] Agent service at {} (project {})",
            config.project.host,
            config.project.project_name
        );

        let background = TaskTracker::new();
        let mut proxies = Vec::new();
        for agent_id in [&config.categoriser_agent_id, &config.data_agent_id] {
            let definition = service
                .get_agent(agent_id)
                .await
                .map_err(|source| ContextError::Agent { id: agent_id.clone(), source })?;
            log::info!("[LIFECYCLE] Registered agent {} ({})", definition.display_name(), definition.id);
            proxies.push(Arc::new(AzureAgentProxy::new(
                Arc::clone(&service),
                definition,
                background.clone(),
            )));
        }

        let agents: Vec<BoxedAgent> = proxies.into_iter().map(|p| p as BoxedAgent).collect();
        let dispatcher = Arc::new(Dispatcher::new(
            agents.clone(),
            config.dispatch_timeout,
            config.dispatch_margin,
        )?);
        let tool = Arc::new(AnalyseTaskTool::new(
            dispatcher,
            GracePolicy {
                attempts: config.grace_attempts,
                interval: config.grace_interval,
            },
        ));

        let chat_model: Arc<dyn ChatModel> = Arc::new(
            AzureChatClient::new(
                client,
                &config.openai_endpoint,
                &config.openai_deployment,
                &config.openai_api_key,
                &config.openai_api_version,
            )
            .map_err(ContextError::Client)?,
        );
        let classifier = build_classifier(config.classifier, Arc::clone(&chat_model));
        log::info!("[LIFECYCLE] Host classifier: {:?}", config.classifier);

        let sessions = Arc::new(SessionStore::new());
        let in_flight = TaskTracker::new();
        let router = Arc::new(HostRouter::new(
            classifier,
            tool,
            Arc::clone(&sessions),
            Some(chat_model),
            in_flight.clone(),
        ));

        Ok(Self::from_parts(
            router,
            sessions,
            agents,
            in_flight,
            background,
            config.shutdown_drain,
        ))
    }

    /// Assemble a context from already-built parts. `in_flight` must be the
    /// tracker the router registers its dispatch rounds on.
    pub fn from_parts(
        router: Arc<HostRouter>,
        sessions: Arc<SessionStore>,
        agents: Vec<BoxedAgent>,
        in_flight: TaskTracker,
        background: TaskTracker,
        drain: Duration,
    ) -> Self {
        Self {
            router,
            sessions,
            agents,
            in_flight,
            background,
            drain,
        }
    }

    /// Stop accepting turns, wait for running ones, then release remote work.
    pub async fn shutdown(&self) {
        self.in_flight.close();
        log::info!(
            "[LIFECYCLE] Waiting up to {}s for {} in-flight dispatch rounds",
            self.drain.as_secs(),
            self.in_flight.len()
        );
        if tokio::time::timeout(self.drain, self.in_flight.wait()).await.is_err() {
            log::warn!("[LIFECYCLE] Drain timed out with {} rounds still running", self.in_flight.len());
        }

        for agent in &self.agents {
            agent.release_all();
        }

        self.background.close();
        if tokio::time::timeout(self.drain, self.background.wait()).await.is_err() {
            log::warn!("[LIFECYCLE] Remote cleanup did not finish in time");
        }
        log::info!("[LIFECYCLE] Shutdown complete");
    }
}
