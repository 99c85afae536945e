//! Client-side story controller: form state, request lifecycle, sanitized
//! rendering and user notifications.

use crate::error::{ErrorKind, mentions_rate_limit};
use crate::filler;
use crate::request::{StoryFields, StoryResponse};
use crate::sanitize::Fragment;
use rand::SeedableRng;
use rand::rngs::StdRng;
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080/api/generate-story";

const RATE_LIMIT_PHRASE: &str = "API rate limit exceeded. Please wait and try again.";
const NETWORK_PHRASE: &str = "Network connection error. Please check your internet connection.";
const CLEARED_MESSAGE: &str = "Form cleared! Ready for a new story.";
const COPIED_MESSAGE: &str = "Story copied to clipboard!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    TrainingDetails,
    PersonalStatement,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::TrainingDetails => "trainingDetails",
            Field::PersonalStatement => "personalStatement",
        }
    }
}

/// The two user actions that issue a story request. Each has its own
/// control, so they are tracked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Generate,
    Regenerate,
}

impl Action {
    /// Text shown in the loading overlay while the request is in flight.
    pub fn loading_message(self) -> &'static str {
        match self {
            Action::Generate => "AI is crafting your training story...",
            Action::Regenerate => "Generating a new story variation...",
        }
    }

    pub fn busy_label(self) -> &'static str {
        match self {
            Action::Generate => "Writing Your Story...",
            Action::Regenerate => "Creating New Story...",
        }
    }

    pub fn idle_label(self) -> &'static str {
        match self {
            Action::Generate => "Generate Story",
            Action::Regenerate => "Generate New Story",
        }
    }

    fn failure_prefix(self) -> &'static str {
        match self {
            Action::Generate => "Failed to generate story. ",
            Action::Regenerate => "Failed to generate new story. ",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Generate => write!(f, "generate"),
            Action::Regenerate => write!(f, "regenerate"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        kind: Option<ErrorKind>,
    },
    #[error("Invalid response format from API")]
    InvalidResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimited,
    Network,
    Other,
}

/// Structured tag first, then the HTTP status, then the message text.
pub fn classify(err: &ClientError) -> FailureClass {
    match err {
        ClientError::Network(_) => FailureClass::Network,
        ClientError::Api {
            kind: Some(ErrorKind::RateLimited),
            ..
        } => FailureClass::RateLimited,
        ClientError::Api {
            kind: Some(ErrorKind::Network),
            ..
        } => FailureClass::Network,
        ClientError::Api { status: 429, .. } => FailureClass::RateLimited,
        other => {
            let message = other.to_string();
            let lowered = message.to_lowercase();
            if mentions_rate_limit(&message) {
                FailureClass::RateLimited
            } else if lowered.contains("network") || lowered.contains("fetch") {
                FailureClass::Network
            } else {
                FailureClass::Other
            }
        }
    }
}

/// The notification text for a failed `action`.
pub fn describe_failure(action: Action, err: &ClientError) -> String {
    let detail = match classify(err) {
        FailureClass::RateLimited => RATE_LIMIT_PHRASE.to_string(),
        FailureClass::Network => NETWORK_PHRASE.to_string(),
        FailureClass::Other => format!("Error: {err}"),
    };
    format!("{}{detail}", action.failure_prefix())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
    Info,
}

impl NotificationKind {
    pub fn color(self) -> &'static str {
        match self {
            NotificationKind::Success => "#48bb78",
            NotificationKind::Error => "#e53e3e",
            NotificationKind::Info => "#667eea",
        }
    }

    pub fn default_timeout(self) -> Duration {
        match self {
            NotificationKind::Success => Duration::from_secs(3),
            NotificationKind::Error => Duration::from_secs(5),
            NotificationKind::Info => Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub raised_at: Instant,
    pub timeout: Duration,
}

impl Notification {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.raised_at) >= self.timeout
    }
}

/// A sanitized story ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedStory {
    fragment: Fragment,
    html: String,
}

impl RenderedStory {
    pub fn from_untrusted(html: &str) -> Self {
        let fragment = Fragment::parse(html).sanitized();
        let html = fragment.to_html();
        Self { fragment, html }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn fragment(&self) -> &Fragment {
        &self.fragment
    }

    pub fn text(&self) -> String {
        self.fragment.text_content()
    }

    pub fn markdown(&self) -> String {
        self.fragment.to_markdown()
    }
}

/// One request that has been started but not sent. Owns everything it needs,
/// so the controller stays free while it is awaited.
#[derive(Debug)]
pub struct PendingStory {
    action: Action,
    http: reqwest::Client,
    endpoint: String,
    fields: StoryFields,
}

impl PendingStory {
    pub fn action(&self) -> Action {
        self.action
    }

    pub fn fields(&self) -> &StoryFields {
        &self.fields
    }

    pub async fn send(self) -> Result<String, ClientError> {
        debug!(action = %self.action, endpoint = %self.endpoint, "sending story request");
        let response = self
            .http
            .post(&self.endpoint)
            .json(&self.fields)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let reply: StoryResponse =
            serde_json::from_slice(&body).map_err(|_| ClientError::InvalidResponse)?;
        if reply.story.trim().is_empty() {
            return Err(ClientError::InvalidResponse);
        }
        Ok(reply.story)
    }
}

fn api_error(status: StatusCode, body: &[u8]) -> ClientError {
    let code = status.as_u16();
    let (message, kind) = match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("API request failed ({code})"));
            let kind = value
                .get("kind")
                .and_then(|kind| serde_json::from_value::<ErrorKind>(kind.clone()).ok());
            (message, kind)
        }
        Err(_) => {
            let reason = status.canonical_reason().unwrap_or("Unknown Status");
            (format!("API request failed ({code}) - {reason}"), None)
        }
    };
    ClientError::Api {
        status: code,
        message,
        kind,
    }
}

pub struct StoryController {
    http: reqwest::Client,
    endpoint: String,
    form: StoryFields,
    rng: StdRng,
    generating: bool,
    regenerating: bool,
    loading: Option<&'static str>,
    focus: Option<Field>,
    story: Option<RenderedStory>,
    notifications: Vec<Notification>,
}

impl StoryController {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_rng(endpoint.into(), StdRng::from_entropy())
    }

    /// Filler for empty fields is reproducible for a given seed.
    pub fn with_seed(endpoint: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(endpoint.into(), StdRng::seed_from_u64(seed))
    }

    fn with_rng(endpoint: String, rng: StdRng) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            form: StoryFields::default(),
            rng,
            generating: false,
            regenerating: false,
            loading: None,
            focus: None,
            story: None,
            notifications: Vec::new(),
        }
    }

    pub fn set_field(&mut self, field: Field, value: impl Into<String>) {
        *self.field_mut(field) = value.into();
    }

    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::TrainingDetails => &self.form.training_details,
            Field::PersonalStatement => &self.form.personal_statement,
        }
    }

    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::TrainingDetails => &mut self.form.training_details,
            Field::PersonalStatement => &mut self.form.personal_statement,
        }
    }

    pub fn is_busy(&self, action: Action) -> bool {
        match action {
            Action::Generate => self.generating,
            Action::Regenerate => self.regenerating,
        }
    }

    fn set_busy(&mut self, action: Action, busy: bool) {
        match action {
            Action::Generate => self.generating = busy,
            Action::Regenerate => self.regenerating = busy,
        }
    }

    pub fn button_label(&self, action: Action) -> &'static str {
        if self.is_busy(action) {
            action.busy_label()
        } else {
            action.idle_label()
        }
    }

    pub fn loading_message(&self) -> Option<&'static str> {
        self.loading
    }

    pub fn focus(&self) -> Option<Field> {
        self.focus
    }

    pub fn story(&self) -> Option<&RenderedStory> {
        self.story.as_ref()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Starts `action`: fills any empty field, disables the action's control
    /// and shows the loading overlay. Returns `None` while the same action is
    /// already in flight.
    pub fn begin(&mut self, action: Action) -> Option<PendingStory> {
        if self.is_busy(action) {
            debug!(%action, "ignoring request while one is in flight");
            return None;
        }
        self.fill_empty_fields();
        self.set_busy(action, true);
        self.loading = Some(action.loading_message());
        Some(PendingStory {
            action,
            http: self.http.clone(),
            endpoint: self.endpoint.clone(),
            fields: StoryFields {
                training_details: self.form.training_details.trim().to_string(),
                personal_statement: self.form.personal_statement.trim().to_string(),
            },
        })
    }

    fn fill_empty_fields(&mut self) {
        if self.form.training_details.trim().is_empty() {
            self.form.training_details = filler::training_details(&mut self.rng);
            debug!(field = Field::TrainingDetails.name(), "filled empty field");
        }
        if self.form.personal_statement.trim().is_empty() {
            self.form.personal_statement = filler::personal_statement(&mut self.rng);
            debug!(field = Field::PersonalStatement.name(), "filled empty field");
        }
    }

    /// Completes `action` with the outcome of its request. Success replaces
    /// the displayed story; failure raises an error notification and hands
    /// the error back.
    pub fn finish(
        &mut self,
        action: Action,
        outcome: Result<String, ClientError>,
    ) -> Result<&RenderedStory, ClientError> {
        self.set_busy(action, false);
        self.loading = None;
        match outcome {
            Ok(html) => {
                let story = RenderedStory::from_untrusted(&html);
                info!(%action, bytes = story.html().len(), "story rendered");
                Ok(&*self.story.insert(story))
            }
            Err(err) => {
                warn!(%action, error = %err, "story request failed");
                let message = describe_failure(action, &err);
                self.notify(NotificationKind::Error, message);
                Err(err)
            }
        }
    }

    /// Runs `action` end to end. `None` when it is already in flight.
    pub async fn run(&mut self, action: Action) -> Option<Result<&RenderedStory, ClientError>> {
        let pending = self.begin(action)?;
        let outcome = pending.send().await;
        Some(self.finish(action, outcome))
    }

    pub async fn generate(&mut self) -> Option<Result<&RenderedStory, ClientError>> {
        self.run(Action::Generate).await
    }

    pub async fn regenerate(&mut self) -> Option<Result<&RenderedStory, ClientError>> {
        self.run(Action::Regenerate).await
    }

    /// Plain text of the current story, never its markup.
    pub fn copy_text(&mut self) -> Option<String> {
        let text = self.story.as_ref()?.text();
        self.notify(NotificationKind::Success, COPIED_MESSAGE);
        Some(text)
    }

    pub fn start_over(&mut self) {
        self.form = StoryFields::default();
        self.story = None;
        self.focus = Some(Field::TrainingDetails);
        self.notify(NotificationKind::Success, CLEARED_MESSAGE);
    }

    pub fn notify(&mut self, kind: NotificationKind, message: impl Into<String>) {
        self.notifications.push(Notification {
            kind,
            message: message.into(),
            raised_at: Instant::now(),
            timeout: kind.default_timeout(),
        });
    }

    /// Drops notifications whose timeout has elapsed at `now`. Returns how
    /// many were removed.
    pub fn dismiss_expired(&mut self, now: Instant) -> usize {
        let before = self.notifications.len();
        self.notifications.retain(|note| !note.is_expired(now));
        before - self.notifications.len()
    }
}
