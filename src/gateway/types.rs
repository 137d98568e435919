//! Request and response types for chat-completions providers.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

/// Who made a call, and for which run and session.
///
/// Carried on every request so usage records can be tied back to the
/// pipeline run that paid for them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attribution {
    /// Static code path, e.g. "agents::reviewer".
    pub caller: &'static str,
    pub run_id: Option<Uuid>,
    pub session_id: Option<i64>,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_session(mut self, session_id: Option<i64>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Paid upstream services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenRouter,
    Perplexity,
    RapidApi,
}

impl Provider {
    pub const fn as_str(self) -> &'static str {
        match self {
            Provider::OpenRouter => "openrouter",
            Provider::Perplexity => "perplexity",
            Provider::RapidApi => "rapidapi",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A model id plus the provider that serves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatModel {
    provider: Provider,
    id: String,
}

impl ChatModel {
    /// e.g. "google/gemini-2.5-flash"
    pub fn openrouter(id: impl Into<String>) -> Self {
        Self {
            provider: Provider::OpenRouter,
            id: id.into(),
        }
    }

    /// e.g. "sonar-pro"
    pub fn perplexity(id: impl Into<String>) -> Self {
        Self {
            provider: Provider::Perplexity,
            id: id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: ChatModel,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask for `response_format: json_object`.
    pub json_mode: bool,
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model,
            messages,
            temperature: 0.0,
            max_tokens: None,
            json_mode: false,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// Total characters across all messages.
    pub fn input_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Unknown(String),
}

impl From<Option<&str>> for FinishReason {
    fn from(s: Option<&str>) -> Self {
        match s {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown(String::new()),
        }
    }
}

/// Tokens and money spent on one call. Costs are in nanodollars (1e-9 USD).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Estimate from the local price table.
    pub cost_nanodollars: i64,
    /// What the provider says it paid upstream, when it reports that.
    pub upstream_cost_nanodollars: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    pub latency: Duration,
    /// Response body exactly as received. Agents store it alongside their
    /// rows and read provider extras (Perplexity citations) out of it.
    pub raw_body: Vec<u8>,
}

impl ChatResponse {
    /// `raw_body` decoded for parsing; invalid UTF-8 is replaced.
    pub fn raw_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.raw_body)
    }
}
