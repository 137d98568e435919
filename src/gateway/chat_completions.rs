//! Client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! OpenRouter (reviewer, editor) and Perplexity (web search) both speak this
//! protocol. An [`Endpoint`] holds everything that differs between them.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ErrorContext, ProviderError};
use super::http;
use super::pricing::chat_cost;
use super::types::{ChatRequest, ChatResponse, FinishReason, Message, Provider, TokenUsage};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const PERPLEXITY_BASE_URL: &str = "https://api.perplexity.ai";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Perplexity bodies carry full search results, so this is generous.
const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

/// Roughly 125k tokens.
const MAX_INPUT_CHARS: usize = 500_000;

/// Where and how to reach one provider.
#[derive(Clone)]
pub struct Endpoint {
    pub provider: Provider,
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Sent on every request, e.g. OpenRouter's `HTTP-Referer` and `X-Title`.
    pub extra_headers: Vec<(&'static str, String)>,
    /// Turn replies that open with "I cannot..." into [`ProviderError::Refused`].
    pub detect_refusals: bool,
}

impl Endpoint {
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self {
            provider: Provider::OpenRouter,
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
            extra_headers: Vec::new(),
            detect_refusals: true,
        }
    }

    /// Search answers routinely open with "I cannot find...", so refusal
    /// detection starts off.
    pub fn perplexity(api_key: impl Into<String>) -> Self {
        Self {
            provider: Provider::Perplexity,
            base_url: PERPLEXITY_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
            extra_headers: Vec::new(),
            detect_refusals: false,
        }
    }

    /// `OPENROUTER_API_KEY`, plus optional `OPENROUTER_BASE_URL`,
    /// `OPENROUTER_TIMEOUT_SECONDS`, `OPENROUTER_REFERER` and
    /// `OPENROUTER_APP_TITLE`.
    pub fn openrouter_from_env() -> Result<Self, ProviderError> {
        let mut endpoint = Self::openrouter(required_env("OPENROUTER_API_KEY")?)
            .apply_env("OPENROUTER_BASE_URL", "OPENROUTER_TIMEOUT_SECONDS");
        if let Ok(referer) = std::env::var("OPENROUTER_REFERER") {
            endpoint.extra_headers.push(("HTTP-Referer", referer));
        }
        if let Ok(title) = std::env::var("OPENROUTER_APP_TITLE") {
            endpoint.extra_headers.push(("X-Title", title));
        }
        Ok(endpoint)
    }

    /// `PERPLEXITY_API_KEY`, plus optional `PERPLEXITY_BASE_URL` and
    /// `PERPLEXITY_TIMEOUT_SECONDS`.
    pub fn perplexity_from_env() -> Result<Self, ProviderError> {
        Ok(Self::perplexity(required_env("PERPLEXITY_API_KEY")?)
            .apply_env("PERPLEXITY_BASE_URL", "PERPLEXITY_TIMEOUT_SECONDS"))
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn detect_refusals(mut self, on: bool) -> Self {
        self.detect_refusals = on;
        self
    }

    fn apply_env(mut self, base_url_var: &str, timeout_var: &str) -> Self {
        if let Ok(url) = std::env::var(base_url_var) {
            self.base_url = url;
        }
        if let Some(secs) = std::env::var(timeout_var)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            self.timeout = Duration::from_secs(secs);
        }
        self
    }
}

fn required_env(var: &str) -> Result<String, ProviderError> {
    std::env::var(var).map_err(|_| ProviderError::config(format!("{var} not set")))
}

#[derive(Debug, Clone)]
pub struct ChatCompletionsAdapter {
    client: reqwest::Client,
    url: String,
    provider: Provider,
    timeout: Duration,
    detect_refusals: bool,
}

impl ChatCompletionsAdapter {
    pub fn new(endpoint: Endpoint) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            http::header_value("API key", &format!("Bearer {}", endpoint.api_key))?,
        );
        for (name, value) in &endpoint.extra_headers {
            headers.insert(*name, http::header_value(name, value)?);
        }

        Ok(Self {
            client: http::build_client(endpoint.timeout, headers)?,
            url: format!("{}/chat/completions", endpoint.base_url.trim_end_matches('/')),
            provider: endpoint.provider,
            timeout: endpoint.timeout,
            detect_refusals: endpoint.detect_refusals,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// One HTTP round trip; no retries.
    pub async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let provider = self.provider.as_str();
        if req.model.provider() != self.provider {
            return Err(ProviderError::invalid_request(format!(
                "{} model {} sent to {provider}",
                req.model.provider(),
                req.model.model_id()
            )));
        }
        let input_chars = req.input_chars();
        if input_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "input too large: {input_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let body = WireRequest {
            model: req.model.model_id(),
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let start = Instant::now();
        let mut response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::send_error(provider, self.timeout, e))?;

        let status = response.status();
        let context = ErrorContext::from_response(status, response.headers());
        let raw_body =
            http::read_body(provider, self.timeout, &mut response, MAX_RESPONSE_BYTES).await?;

        let completion = {
            let text = http::body_text(&raw_body);
            if !status.is_success() {
                return Err(error_from_body(provider, &text, context));
            }
            parse_completion(provider, &text, self.detect_refusals)?
        };
        let usage = TokenUsage {
            cost_nanodollars: chat_cost(
                req.model.model_id(),
                completion.input_tokens,
                completion.output_tokens,
            ),
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            upstream_cost_nanodollars: completion.upstream_cost_nanodollars,
        };

        Ok(ChatResponse {
            content: completion.content,
            finish_reason: completion.finish_reason,
            usage,
            latency: start.elapsed(),
            raw_body,
        })
    }
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    cost_details: Option<WireCostDetails>,
}

#[derive(Deserialize)]
struct WireCostDetails {
    upstream_inference_cost: Option<f64>,
}

#[derive(Deserialize)]
struct WireError {
    message: Option<String>,
    /// A string on OpenRouter, a number on some upstreams.
    code: Option<Value>,
}

struct Completion {
    content: String,
    finish_reason: FinishReason,
    input_tokens: u32,
    output_tokens: u32,
    upstream_cost_nanodollars: Option<i64>,
}

fn error_from_body(provider: &'static str, body: &str, mut context: ErrorContext) -> ProviderError {
    let mut message = format!("HTTP {}", context.http_status.unwrap_or_default());
    if let Some(error) = serde_json::from_str::<WireResponse>(body)
        .ok()
        .and_then(|r| r.error)
    {
        if let Some(m) = error.message {
            message = m;
        }
        context.provider_code = error.code.map(|code| match code {
            Value::String(s) => s,
            other => other.to_string(),
        });
    } else if !body.trim().is_empty() {
        message = format!("{message}: {}", http::preview(body));
    }
    ProviderError::from_status(provider, message, context)
}

fn parse_completion(
    provider: &'static str,
    body: &str,
    detect_refusals: bool,
) -> Result<Completion, ProviderError> {
    let parsed: WireResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::malformed(provider, format!("invalid JSON: {e}")))?;

    // Some upstreams report failures inside a 200.
    if let Some(error) = parsed.error {
        let message = error.message.unwrap_or_default();
        if detect_refusals && is_refusal(&message) {
            return Err(ProviderError::refused(provider, message));
        }
        return Err(ProviderError::upstream(provider, message));
    }

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::malformed(provider, "no choices in response"))?;

    let content = choice.message.map(message_text).unwrap_or_default();
    if detect_refusals && is_refusal(&content) {
        return Err(ProviderError::refused(provider, content));
    }

    let usage = parsed.usage.unwrap_or_else(|| {
        tracing::warn!(provider, "response has no usage block; recording zero tokens");
        WireUsage {
            prompt_tokens: None,
            completion_tokens: None,
            cost_details: None,
        }
    });

    Ok(Completion {
        content,
        finish_reason: FinishReason::from(choice.finish_reason.as_deref()),
        input_tokens: usage.prompt_tokens.unwrap_or(0),
        output_tokens: usage.completion_tokens.unwrap_or(0),
        upstream_cost_nanodollars: usage
            .cost_details
            .and_then(|d| d.upstream_inference_cost)
            .map(|usd| ((usd * 1e9).round() as i64).max(0)),
    })
}

/// Message content, or the first non-empty tool-call arguments when a model
/// answers JSON mode through a tool call.
fn message_text(message: WireMessage) -> String {
    match message.content {
        Some(content) if !content.trim().is_empty() => content,
        _ => message
            .tool_calls
            .into_iter()
            .filter_map(|tc| tc.function.and_then(|f| f.arguments))
            .find(|args| !args.trim().is_empty())
            .unwrap_or_default(),
    }
}

/// Only the first line is checked; posts may legitimately contain "I can't".
fn is_refusal(text: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "refus",
        "i cannot",
        "i can't",
        "i won't",
        "i will not",
        "i am unable to",
        "i'm unable to",
        "unable to comply",
        "unable to assist",
    ];
    let first_line = text.trim_start().lines().next().unwrap_or("").to_lowercase();
    PREFIXES.iter().any(|p| first_line.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn refusal_checks_first_line_only() {
        assert!(is_refusal("I cannot help with that."));
        assert!(is_refusal("  Refusing: policy"));
        assert!(!is_refusal("Here are the posts.\nI cannot stress this enough."));
    }

    #[test]
    fn url_tolerates_trailing_slash() {
        let adapter = ChatCompletionsAdapter::new(
            Endpoint::openrouter("sk-test").base_url("http://localhost:1234/v1/"),
        )
        .unwrap();
        assert_eq!(adapter.url, "http://localhost:1234/v1/chat/completions");
    }

    #[test]
    fn error_body_code_is_stringified() {
        let ctx = ErrorContext::new().with_status(400);
        let err = error_from_body(
            "openrouter",
            r#"{"error": {"message": "bad model", "code": 400}}"#,
            ctx,
        );
        assert!(matches!(
            err,
            ProviderError::Rejected { ref message, .. } if message == "bad model"
        ));
        assert_eq!(err.context().and_then(|c| c.provider_code.as_deref()), Some("400"));
    }

    #[test]
    fn error_inside_success_is_upstream() {
        let body = json!({"error": {"message": "overloaded"}}).to_string();
        let err = parse_completion("openrouter", &body, true).err().unwrap();
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_usage_counts_as_zero() {
        let body = json!({"choices": [{"message": {"content": "hi"}, "finish_reason": "length"}]})
            .to_string();
        let completion = parse_completion("perplexity", &body, false).unwrap();
        assert_eq!(completion.content, "hi");
        assert_eq!(completion.finish_reason, FinishReason::Length);
        assert_eq!(completion.input_tokens, 0);
    }

    #[test]
    fn empty_choices_are_malformed() {
        let err = parse_completion("openrouter", r#"{"choices": []}"#, true).err().unwrap();
        assert_eq!(err.code(), "malformed");
    }
}
