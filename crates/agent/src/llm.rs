//! Chat-completion clients.
//!
//! The agent treats the model as prompt-in, text-out. [`OpenAiCompatibleClient`] speaks the
//! `/chat/completions` dialect shared by Groq, OpenAI and Ollama.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use convoy_core::config::LlmConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model client misconfigured: {0}")]
    Configuration(String),
    #[error("model request failed: {0}")]
    Transport(String),
    #[error("model API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model reply had no content")]
    EmptyReply,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any OpenAI-compatible chat-completions endpoint.
///
/// Retries transient failures (transport errors, 429, 5xx) up to `max_retries` times with a
/// doubling delay.
#[derive(Clone, Debug)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LlmError::Configuration(format!("http client: {error}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.effective_base_url().trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(500),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn attempt(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = CompletionRequest { model: &self.model, messages, temperature: 0.2 };
        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status();
        debug!(event_name = "agent.llm.response", status = %status, "completion response received");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let parsed = response
            .json::<CompletionResponse>()
            .await
            .map_err(|error| LlmError::Transport(format!("undecodable reply: {error}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyReply)
    }
}

fn is_transient(error: &LlmError) -> bool {
    match error {
        LlmError::Transport(_) => true,
        LlmError::Status { status, .. } => StatusCode::from_u16(*status)
            .is_ok_and(|status| status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()),
        LlmError::Configuration(_) | LlmError::EmptyReply => false,
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.attempt(messages).await {
                Ok(content) => return Ok(content),
                Err(error) if attempt < self.max_retries && is_transient(&error) => {
                    attempt += 1;
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        event_name = "agent.llm.retry",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying completion after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Replays canned replies in order and records every prompt it was sent.
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::default();
        for reply in replies {
            client.push_reply(reply);
        }
        client
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.push(Ok(reply.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.push(Err(message.into()));
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        match self.prompts.lock() {
            Ok(prompts) => prompts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, entry: Result<String, String>) {
        match self.replies.lock() {
            Ok(mut replies) => replies.push_back(entry),
            Err(poisoned) => poisoned.into_inner().push_back(entry),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        match self.prompts.lock() {
            Ok(mut prompts) => prompts.push(messages.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(messages.to_vec()),
        }
        let next = match self.replies.lock() {
            Ok(mut replies) => replies.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(LlmError::Transport(message)),
            None => Err(LlmError::Transport("scripted replies exhausted".to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use convoy_core::config::{LlmConfig, LlmProvider};

    use super::{is_transient, ChatMessage, LlmClient, LlmError, OpenAiCompatibleClient, ScriptedLlmClient};

    fn llm_config(provider: LlmProvider, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: None,
            base_url: base_url.map(str::to_owned),
            model: "llama3-70b-8192".to_owned(),
            timeout_secs: 5,
            max_retries: 0,
        }
    }

    #[test]
    fn endpoint_derives_from_provider_or_override() {
        let groq = OpenAiCompatibleClient::from_config(&llm_config(LlmProvider::Groq, None))
            .expect("client");
        assert_eq!(groq.endpoint(), "https://api.groq.com/openai/v1/chat/completions");

        let local = OpenAiCompatibleClient::from_config(&llm_config(
            LlmProvider::Ollama,
            Some("http://10.0.0.5:11434/v1/"),
        ))
        .expect("client");
        assert_eq!(local.endpoint(), "http://10.0.0.5:11434/v1/chat/completions");
        assert_eq!(local.model(), "llama3-70b-8192");
    }

    #[test]
    fn only_rate_limits_and_server_errors_are_transient() {
        assert!(is_transient(&LlmError::Status { status: 429, body: String::new() }));
        assert!(is_transient(&LlmError::Status { status: 503, body: String::new() }));
        assert!(!is_transient(&LlmError::Status { status: 401, body: String::new() }));
        assert!(!is_transient(&LlmError::EmptyReply));
    }

    #[tokio::test]
    async fn scripted_client_replays_in_order_and_records_prompts() {
        let client = ScriptedLlmClient::new(["first"]);
        client.push_failure("offline");

        let prompt = vec![ChatMessage::system("be brief"), ChatMessage::user("hello")];
        assert_eq!(client.complete(&prompt).await.expect("first reply"), "first");
        assert!(matches!(client.complete(&prompt).await, Err(LlmError::Transport(message)) if message == "offline"));
        assert!(client.complete(&prompt).await.is_err());
        assert_eq!(client.prompts().len(), 3);
        assert_eq!(client.prompts()[0][1].content, "hello");
    }
}
