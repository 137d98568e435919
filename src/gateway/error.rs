//! Error types shared by every external collaborator.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;

/// What the provider told us about a failed call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub http_status: Option<u16>,
    /// Provider error code from the body (e.g. "rate_limit_exceeded").
    pub provider_code: Option<String>,
    /// `x-request-id`, when the provider sends one.
    pub request_id: Option<String>,
    /// `Retry-After` in seconds, when the provider sends one.
    pub retry_after: Option<Duration>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status plus whatever the response headers carry.
    pub fn from_response(status: StatusCode, headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        Self {
            http_status: Some(status.as_u16()),
            provider_code: None,
            request_id: header("x-request-id").map(str::to_string),
            retry_after: header(RETRY_AFTER.as_str())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429.
    #[error("{provider} rate limited")]
    RateLimited {
        provider: &'static str,
        context: ErrorContext,
    },

    /// Any other 4xx. Retrying the same request will not help.
    #[error("{provider} rejected the request: {message}")]
    Rejected {
        provider: &'static str,
        message: String,
        context: ErrorContext,
    },

    /// 5xx from the provider.
    #[error("{provider} upstream error: {message}")]
    Upstream {
        provider: &'static str,
        message: String,
        context: ErrorContext,
    },

    /// The model declined to answer.
    #[error("{provider} refused: {message}")]
    Refused {
        provider: &'static str,
        message: String,
    },

    /// A 2xx response we could not make sense of.
    #[error("{provider} sent a malformed response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },

    /// Caught before anything was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{provider} timed out after {after:?}")]
    Timeout {
        provider: &'static str,
        after: Duration,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing API key, bad header value, client build failure.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// 429 is a rate limit, 5xx is an upstream failure, anything else is a
    /// rejection.
    pub fn from_status(
        provider: &'static str,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        let message = message.into();
        match context.http_status {
            Some(429) => Self::RateLimited { provider, context },
            Some(status) if status >= 500 => Self::Upstream {
                provider,
                message,
                context,
            },
            _ => Self::Rejected {
                provider,
                message,
                context,
            },
        }
    }

    pub fn upstream(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider,
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn malformed(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            provider,
            message: message.into(),
        }
    }

    pub fn refused(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Refused {
            provider,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Upstream { .. } | Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Rejected { .. }
            | Self::Refused { .. }
            | Self::Malformed { .. }
            | Self::InvalidRequest(_)
            | Self::Config(_) => false,
        }
    }

    /// Short code for usage records and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Rejected { .. } => "rejected",
            Self::Upstream { .. } => "upstream",
            Self::Refused { .. } => "refused",
            Self::Malformed { .. } => "malformed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Timeout { .. } => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. }
            | Self::Rejected { context, .. }
            | Self::Upstream { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Server-requested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        self.context().and_then(|c| c.retry_after)
    }
}
