use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Coarse failure category carried on every error body so clients can pick a
/// user-facing phrasing without parsing the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Configuration,
    Upstream,
    RateLimited,
    MalformedUpstreamResponse,
    Network,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Upstream => "upstream",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::MalformedUpstreamResponse => "malformed_upstream_response",
            ErrorKind::Network => "network",
        };
        f.write_str(label)
    }
}

/// Everything that can go wrong between receiving a story request and
/// returning the generated HTML.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("missing required fields")]
    MissingField,
    #[error("invalid input format")]
    InvalidFormat,
    #[error("input too long")]
    TooLong,
    #[error("completion API credential is not configured")]
    Configuration,
    #[error("completion API returned {status}: {message}")]
    UpstreamStatus { status: u16, message: String },
    #[error("completion API transport failure: {0}")]
    UpstreamTransport(String),
    #[error("completion API did not answer within {0:?}")]
    UpstreamTimeout(Duration),
    #[error("malformed completion response: {0}")]
    MalformedUpstreamResponse(String),
}

impl StoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoryError::MissingField | StoryError::InvalidFormat | StoryError::TooLong => {
                ErrorKind::InvalidInput
            }
            StoryError::Configuration => ErrorKind::Configuration,
            StoryError::UpstreamStatus { status, message } => {
                if *status == 429 || mentions_rate_limit(message) {
                    ErrorKind::RateLimited
                } else {
                    ErrorKind::Upstream
                }
            }
            StoryError::UpstreamTransport(_) | StoryError::UpstreamTimeout(_) => {
                ErrorKind::Upstream
            }
            StoryError::MalformedUpstreamResponse(_) => ErrorKind::MalformedUpstreamResponse,
        }
    }

    /// HTTP status reported to the caller.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidInput => 400,
            _ => 500,
        }
    }

    /// The stable message returned to callers. Upstream and configuration
    /// detail stays in the server log.
    pub fn client_message(&self) -> &'static str {
        match self {
            StoryError::MissingField => "Missing required fields",
            StoryError::InvalidFormat => "Invalid input format",
            StoryError::TooLong => "Input too long",
            StoryError::Configuration => "API configuration error",
            StoryError::UpstreamStatus { .. } => "Story generation temporarily unavailable",
            StoryError::MalformedUpstreamResponse(_) => "Invalid response format from OpenAI API",
            StoryError::UpstreamTransport(_) | StoryError::UpstreamTimeout(_) => {
                "Service temporarily unavailable. Please try again."
            }
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.client_message().to_string(),
            kind: Some(self.kind()),
        }
    }
}

/// JSON body of every non-success response: `{"error": "...", "kind": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: None,
        }
    }
}

pub(crate) fn mentions_rate_limit(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("rate limit") || lowered.contains("quota")
}
