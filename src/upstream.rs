//! Outbound chat-completion call and validation of its untrusted reply.

use crate::error::StoryError;
use crate::prompt::{ChatRequest, DEFAULT_MODEL, GenerationParams};
use crate::request::StoryRequest;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bearer credential for the completion API. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Returns `None` for blank input.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var).ok().and_then(Self::new)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub model: String,
    pub params: GenerationParams,
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_COMPLETIONS_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            params: GenerationParams::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Thin wrapper over a pooled `reqwest::Client`. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    config: Arc<CompletionConfig>,
}

impl CompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    /// Sends one completion request for `request` and returns the trimmed
    /// story HTML. No retries.
    pub async fn complete(&self, key: &ApiKey, request: &StoryRequest) -> Result<String, StoryError> {
        let body = ChatRequest::for_story(&self.config.model, &self.config.params, request);
        debug!(endpoint = %self.config.endpoint, model = %self.config.model, "sending completion request");

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;

        if !status.is_success() {
            return Err(StoryError::UpstreamStatus {
                status: status.as_u16(),
                message: upstream_error_message(status.as_u16(), &bytes),
            });
        }
        extract_story(&bytes)
    }

    fn transport_error(&self, err: reqwest::Error) -> StoryError {
        if err.is_timeout() {
            StoryError::UpstreamTimeout(self.config.timeout)
        } else {
            StoryError::UpstreamTransport(err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ReplyMessage>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Pulls `choices[0].message.content` out of a 2xx reply body.
pub fn extract_story(body: &[u8]) -> Result<String, StoryError> {
    let reply: CompletionReply = serde_json::from_slice(body)
        .map_err(|err| StoryError::MalformedUpstreamResponse(format!("unexpected body: {err}")))?;
    let content = reply
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| StoryError::MalformedUpstreamResponse("no choices".to_string()))?
        .message
        .and_then(|message| message.content)
        .ok_or_else(|| {
            StoryError::MalformedUpstreamResponse("first choice has no message content".to_string())
        })?;
    let story = content.trim();
    if story.is_empty() {
        return Err(StoryError::MalformedUpstreamResponse(
            "message content is empty".to_string(),
        ));
    }
    Ok(story.to_string())
}

/// The upstream's own `error.message`, or a generic line naming the status.
pub fn upstream_error_message(status: u16, body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .as_ref()
        .and_then(|value| value.pointer("/error/message"))
        .and_then(Value::as_str)
        .filter(|message| !message.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("completion API request failed ({status})"))
}
