use super::retry::{with_retries, RetryPolicy};
use super::{AiError, ChatModel, Message};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

/// Azure OpenAI chat-completion client used by the host
#[derive(Clone)]
pub struct AzureChatClient {
    client: Client,
    auth_headers: header::HeaderMap,
    url: String,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    messages: Vec<ChatCompletionMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

impl AzureChatClient {
    pub fn new(
        client: Client,
        endpoint: &str,
        deployment: &str,
        api_key: &str,
        api_version: &str,
    ) -> Result<Self, String> {
        let mut auth_headers = header::HeaderMap::new();
        auth_headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let key_value = header::HeaderValue::from_str(api_key)
            .map_err(|e| format!("Invalid API key format: {}", e))?;
        auth_headers.insert("api-key", key_value);

        Ok(Self {
            client,
            auth_headers,
            url: format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
            retry: RetryPolicy::default(),
        })
    }

    async fn complete_once(&self, request: &ChatCompletionRequest<'_>) -> Result<String, AiError> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.auth_headers.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| AiError::new(format!("Azure OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<OpenAIErrorResponse>(&error_text) {
                Ok(parsed) => format!("Azure OpenAI error: {}", parsed.error.message),
                Err(_) => format!("Azure OpenAI returned error status: {}, body: {}", status, error_text),
            };
            return Err(AiError::with_status(message, status.as_u16()));
        }

        let data: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AiError::protocol(format!("Failed to parse Azure OpenAI response: {}", e)))?;

        data.choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AiError::protocol("Azure OpenAI returned no content"))
    }
}

#[async_trait]
impl ChatModel for AzureChatClient {
    async fn generate_text(&self, messages: Vec<Message>) -> Result<String, AiError> {
        let request = ChatCompletionRequest {
            messages: messages
                .iter()
                .map(|m| ChatCompletionMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: 1024,
            temperature: 0.0,
        };

        log::debug!("Sending request to Azure OpenAI ({} messages)", request.messages.len());

        with_retries("HOST_MODEL", self.retry, || self.complete_once(&request)).await
    }
}
