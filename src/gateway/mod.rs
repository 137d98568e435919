//! Paid-API plumbing: chat completions (OpenRouter, Perplexity), error
//! classification, retries, pricing and usage records.

pub mod chat_completions;
pub mod error;
pub(crate) mod http;
pub mod pricing;
pub mod types;
pub mod usage;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::sleep;

use chat_completions::ChatCompletionsAdapter;
use usage::ProviderCallRecord;

pub use chat_completions::Endpoint;
pub use error::{ErrorContext, ProviderError};
pub use pricing::{chat_cost, pricing_for, ModelPricing};
pub use types::*;
pub use usage::{NoopUsageSink, UsageSink, UsageTally, UsageTotals};

/// Longest server-requested `Retry-After` we are willing to sleep for.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// The seam agents call through. Tests substitute canned gateways.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// A chat adapter with retries and per-attempt usage records.
pub struct ProviderGateway {
    adapter: ChatCompletionsAdapter,
    usage_sink: Arc<dyn UsageSink>,
    config: GatewayConfig,
}

impl ProviderGateway {
    pub fn new(adapter: ChatCompletionsAdapter, usage_sink: Arc<dyn UsageSink>) -> Self {
        Self::with_config(adapter, usage_sink, GatewayConfig::default())
    }

    pub fn with_config(
        adapter: ChatCompletionsAdapter,
        usage_sink: Arc<dyn UsageSink>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            adapter,
            usage_sink,
            config,
        }
    }

    pub fn from_endpoint(
        endpoint: Endpoint,
        usage_sink: Arc<dyn UsageSink>,
    ) -> Result<Self, ProviderError> {
        Ok(Self::new(ChatCompletionsAdapter::new(endpoint)?, usage_sink))
    }
}

#[async_trait]
impl ChatGateway for ProviderGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let req = &req;
        let provider = self.adapter.provider();
        with_retries(&self.config, provider.as_str(), |_| async move {
            let start = Instant::now();
            let result = self.adapter.chat(req).await;

            let record = ProviderCallRecord::new(
                provider,
                "chat/completions",
                req.model.model_id(),
                &req.attribution,
            );
            let record = match &result {
                Ok(resp) => record.usage(resp.usage).latency(resp.latency),
                Err(err) => record.latency(start.elapsed()).failed(err),
            };
            self.usage_sink.record(record).await;
            result
        })
        .await
    }
}

/// Run `op` until it succeeds, fails permanently, or `config.max_retries`
/// retries are spent. Waits `Retry-After` when the provider sent one,
/// otherwise backs off exponentially.
pub async fn with_retries<T, F, Fut>(
    config: &GatewayConfig,
    provider: &'static str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt >= config.max_retries {
            return Err(err);
        }

        let delay = err
            .retry_after()
            .map(|d| d.min(MAX_RETRY_AFTER))
            .unwrap_or_else(|| backoff_delay(config.retry_base_delay, attempt));
        tracing::warn!(
            provider,
            attempt,
            code = err.code(),
            delay_ms = delay.as_millis() as u64,
            "retrying provider call"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// `base * 2^attempt`, with the exponent capped at 5.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt.min(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_retries: u32) -> GatewayConfig {
        GatewayConfig {
            max_retries,
            retry_base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 9), Duration::from_millis(3_200));
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(&config(3), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::invalid_request("bad")) }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_errors_use_the_whole_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(&config(2), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::upstream("test", "flaky")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_backoff() {
        let started = tokio::time::Instant::now();
        let result = with_retries(&config(1), "test", |attempt| async move {
            if attempt == 0 {
                let mut context = ErrorContext::new().with_status(429);
                context.retry_after = Some(Duration::from_secs(7));
                Err(ProviderError::from_status("test", "slow down", context))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(7) && waited < Duration::from_secs(8));
    }
}
