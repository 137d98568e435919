//! Provider call records and where they go.
//!
//! Every attempt against a paid API, successful or not, produces one
//! [`ProviderCallRecord`]. The chat gateway and the RapidAPI client hand
//! records to a [`UsageSink`]; the CLI tallies them per run and, with
//! `--log-usage`, echoes each one to stderr as a JSON line.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::ProviderError;
use super::types::{Attribution, Provider, TokenUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderCallRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: Provider,
    /// "chat/completions" or "search-v2".
    pub endpoint: &'static str,
    /// Empty for endpoints without a model.
    pub model: String,
    pub caller: &'static str,
    pub run_id: Option<Uuid>,
    pub session_id: Option<i64>,
    #[serde(flatten)]
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub status: CallStatus,
    pub error_code: Option<&'static str>,
}

impl ProviderCallRecord {
    pub fn new(
        provider: Provider,
        endpoint: &'static str,
        model: impl Into<String>,
        attribution: &Attribution,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            provider,
            endpoint,
            model: model.into(),
            caller: attribution.caller,
            run_id: attribution.run_id,
            session_id: attribution.session_id,
            usage: TokenUsage::default(),
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
        }
    }

    pub fn usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn failed(mut self, err: &ProviderError) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(err.code());
        self
    }
}

#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Must not fail the call being recorded; problems are logged here.
    async fn record(&self, record: ProviderCallRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Running totals for one process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub errors: u64,
    pub cost_nanodollars: i64,
}

impl fmt::Display for UsageTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} provider calls ({} failed), est. ${:.4}",
            self.calls,
            self.errors,
            self.cost_nanodollars as f64 / 1e9
        )
    }
}

/// Sums every record it sees and optionally echoes each one to stderr.
#[derive(Debug, Default)]
pub struct UsageTally {
    echo: bool,
    totals: Mutex<UsageTotals>,
}

impl UsageTally {
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            totals: Mutex::new(UsageTotals::default()),
        }
    }

    pub fn totals(&self) -> UsageTotals {
        self.totals.lock().map(|t| *t).unwrap_or_default()
    }
}

#[async_trait]
impl UsageSink for UsageTally {
    async fn record(&self, record: ProviderCallRecord) {
        if let Ok(mut totals) = self.totals.lock() {
            totals.calls += 1;
            if record.status == CallStatus::Error {
                totals.errors += 1;
            }
            totals.cost_nanodollars += record.usage.cost_nanodollars;
        }
        if self.echo {
            match serde_json::to_string(&record) {
                Ok(line) => eprintln!("{line}"),
                Err(err) => tracing::warn!(error = %err, "failed to serialize usage record"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tally_counts_errors_and_cost() {
        let tally = UsageTally::new(false);
        let attribution = Attribution::new("test").with_session(Some(3));

        let ok =
            ProviderCallRecord::new(Provider::OpenRouter, "chat/completions", "m", &attribution)
                .usage(TokenUsage {
                    cost_nanodollars: 1_500_000,
                    ..TokenUsage::default()
                });
        let failed = ProviderCallRecord::new(Provider::RapidApi, "search-v2", "", &attribution)
            .failed(&ProviderError::upstream("rapidapi", "boom"));
        assert_eq!(failed.error_code, Some("upstream"));
        assert_eq!(failed.session_id, Some(3));

        tally.record(ok).await;
        tally.record(failed).await;

        let totals = tally.totals();
        assert_eq!(totals.calls, 2);
        assert_eq!(totals.errors, 1);
        assert_eq!(totals.to_string(), "2 provider calls (1 failed), est. $0.0015");
    }

    #[test]
    fn record_serializes_flat() {
        let record = ProviderCallRecord::new(
            Provider::Perplexity,
            "chat/completions",
            "sonar-pro",
            &Attribution::new("agents::search"),
        )
        .latency(Duration::from_millis(1200));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["provider"], "perplexity");
        assert_eq!(value["input_tokens"], 0);
        assert_eq!(value["latency_ms"], 1200);
        assert_eq!(value["status"], "success");
    }
}
