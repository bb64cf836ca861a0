//! REST client for the agent-hosting service.
//!
//! Agents are pre-provisioned; this client only reads their definitions and
//! drives thread → message → run lifecycles on them.

use crate::ai::retry::{with_retries, RetryPolicy};
use crate::ai::AiError;
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Pre-provisioned agent as reported by the service
#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl AgentDefinition {
    /// Name used for attribution, falling back to the id
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thread {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// No further progress will happen on the remote side
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled | RunStatus::Failed | RunStatus::Completed | RunStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<MessageText>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    value: String,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorResponse {
    error: ServiceError,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    message: String,
}

/// Client for the agents REST surface of one project
pub struct AgentServiceClient {
    client: Client,
    auth_headers: header::HeaderMap,
    base_url: String,
    api_version: String,
    retry: RetryPolicy,
}

impl AgentServiceClient {
    pub fn new(
        client: Client,
        base_url: &str,
        access_token: &str,
        api_version: &str,
    ) -> Result<Self, String> {
        let mut auth_headers = header::HeaderMap::new();
        auth_headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let bearer = header::HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| format!("Invalid access token format: {}", e))?;
        auth_headers.insert(header::AUTHORIZATION, bearer);

        Ok(Self {
            client,
            auth_headers,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}?api-version={}", self.base_url, path, self.api_version)
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, AiError> {
        let mut request = self
            .client
            .request(method.clone(), self.url(path))
            .headers(self.auth_headers.clone())
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AiError::new(format!("Agent service request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ServiceErrorResponse>(&error_text) {
                Ok(parsed) => format!("Agent service error: {}", parsed.error.message),
                Err(_) => format!("{} {} returned {}: {}", method, path, status, error_text),
            };
            return Err(AiError::with_status(message, status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| AiError::protocol(format!("Failed to parse {} {} response: {}", method, path, e)))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, AiError> {
        with_retries("AGENT_SERVICE", self.retry, || {
            self.send_once(method.clone(), path, query, body)
        })
        .await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<AgentDefinition, AiError> {
        self.send(Method::GET, &format!("/assistants/{}", agent_id), &[], None).await
    }

    /// Sent once: a retried POST could leave an orphan thread behind.
    pub async fn create_thread(&self) -> Result<Thread, AiError> {
        self.send_once(Method::POST, "/threads", &[], Some(&json!({}))).await
    }

    /// Sent once: a retried POST could post the question twice.
    pub async fn create_message(&self, thread_id: &str, content: &str) -> Result<(), AiError> {
        let body = json!({ "role": "user", "content": content });
        let _: Value = self
            .send_once(Method::POST, &format!("/threads/{}/messages", thread_id), &[], Some(&body))
            .await?;
        Ok(())
    }

    /// Start a run. Sent exactly once: a retried POST could start a second run.
    pub async fn create_run(&self, thread_id: &str, agent_id: &str) -> Result<Run, AiError> {
        let body = json!({ "assistant_id": agent_id });
        self.send_once(Method::POST, &format!("/threads/{}/runs", thread_id), &[], Some(&body))
            .await
    }

    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AiError> {
        self.send(Method::GET, &format!("/threads/{}/runs/{}", thread_id, run_id), &[], None)
            .await
    }

    pub async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), AiError> {
        let _: Value = self
            .send_once(
                Method::POST,
                &format!("/threads/{}/runs/{}/cancel", thread_id, run_id),
                &[],
                Some(&json!({})),
            )
            .await?;
        Ok(())
    }

    /// Text of the newest assistant message produced by `run_id`
    pub async fn latest_assistant_text(&self, thread_id: &str, run_id: &str) -> Result<String, AiError> {
        let list: MessageList = self
            .send(
                Method::GET,
                &format!("/threads/{}/messages", thread_id),
                &[("order", "desc"), ("limit", "20")],
                None,
            )
            .await?;

        extract_assistant_text(list, run_id)
            .ok_or_else(|| AiError::protocol(format!("Run {} produced no assistant text", run_id)))
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), AiError> {
        let _: Value = self
            .send(Method::DELETE, &format!("/threads/{}", thread_id), &[], None)
            .await?;
        Ok(())
    }
}

fn extract_assistant_text(list: MessageList, run_id: &str) -> Option<String> {
    let message = list.data.into_iter().find(|m| {
        m.role == "assistant" && m.run_id.as_deref().map_or(true, |id| id == run_id)
    })?;

    let parts: Vec<String> = message
        .content
        .into_iter()
        .filter(|c| c.content_type == "text")
        .filter_map(|c| c.text.map(|t| t.value))
        .collect();

    let text = parts.join("\n");
    if text.trim().is_empty() { None } else { Some(text) }
}
