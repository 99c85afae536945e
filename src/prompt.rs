//! Prompt text and the outbound chat-completion request body.

use crate::request::StoryRequest;
use serde::Serialize;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const SYSTEM_PROMPT: &str = "You are a professional training storyteller. You write funny, \
engaging and educational narratives in which workplace comedy makes the lesson memorable while \
still delivering clear training value. Write like a comedian who also happens to be an \
excellent trainer: people should laugh while they learn.";

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 1500,
            temperature: 0.8,
            presence_penalty: 0.1,
            frequency_penalty: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl ChatRequest {
    /// The two-message exchange for one story: fixed system voice, then the
    /// constructed prompt.
    pub fn for_story(model: &str, params: &GenerationParams, request: &StoryRequest) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: Role::User,
                    content: story_prompt(request),
                },
            ],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
        }
    }
}

/// Builds the user prompt. Deterministic for a given request.
pub fn story_prompt(request: &StoryRequest) -> String {
    format!(
        r#"Write a personalized training story told in the first person, based on the details below.

TRAINING SESSION DETAILS:
{training}

PERSONAL DETAIL ABOUT THE TRAINER:
{personal}

NARRATION RULES:
- Tell the whole story in the FIRST PERSON, using "I", "me" and "my" throughout
- Never use third-person pronouns such as "he" or "she", and never give anyone a name
- The narrator is the trainer, recounting something that happened to them
- Open sentences with "I" where natural, e.g. "I was working in...", "I noticed..."
- Weave the personal detail into the narrative naturally
- Show me running into a realistic workplace problem tied to the training topic
- Show me applying the training concepts to get past it
- Keep the story to 400 words or fewer
- Answer with clean HTML tags only; do not use Markdown syntax of any kind
- Keep single line spacing; no blank lines between sentences or paragraphs

TONE:
- Make it FUNNY: awkward moments, harmless misunderstandings, quirky colleagues
- Use the personal detail for humor where it fits
- Include amusing dialogue or inner monologue
- Stay professional enough for a workplace session
- The humor should carry the lesson, not bury it

Return exactly this HTML structure:
<div class="story-section">
<h3>The Story</h3>
<p>[Opening: set the scene with humor, in my voice]</p>
<p>[Challenge: the problem gets absurd, from my perspective]</p>
<p>[Resolution: how my personal detail and the training concept saved the day]</p>
</div>

<div class="training-section">
<h3>Training Application</h3>
<div class="application-overview">
<h4>Story Relevance</h4>
<p>[Two or three sentences tying the story to the training objectives and the audience]</p>
</div>

<div class="facilitation-guide">
<h4>How to Use This Story</h4>
<ul>
<li><strong>Opening Activity:</strong> [How to introduce the story: timing, setup, engagement]</li>
<li><strong>Discussion Questions:</strong> [Two or three questions with follow-up prompts, single spaced]</li>
<li><strong>Learning Connection:</strong> [How to link story moments to the key concepts and real work]</li>
<li><strong>Action Planning:</strong> [Concrete steps participants can take back to their jobs]</li>
</ul>
</div>

<div class="trainer-tips">
<h4>Trainer Notes</h4>
<p>[Delivery tips, reactions to expect, and ways to adapt the story to different groups]</p>
</div>
</div>

Use well-formed semantic HTML with single line spacing. Make the Training Application section thorough enough to run the session from. Do not emit Markdown such as ** or ## anywhere; use HTML tags only."#,
        training = request.training_details(),
        personal = request.personal_statement(),
    )
}
