//! Web search through Perplexity's chat-completions API.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::parse::truncate_chars;
use super::{RunContext, SearchProvider};
use crate::cache::{Fetched, RawResponse};
use crate::gateway::{ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::model::SearchHit;
use crate::prompts::search_prompt;

pub const DEFAULT_SEARCH_MODEL: &str = "sonar-pro";

/// URL recorded when the answer cites no sources.
pub const PLACEHOLDER_URL: &str = "https://perplexity.ai/search";

/// Snippet length when every citation shares the answer text.
const CITATION_SNIPPET_CHARS: usize = 500;

pub struct PerplexitySearch {
    gateway: Arc<dyn ChatGateway>,
    model: String,
}

impl PerplexitySearch {
    pub fn new(gateway: Arc<dyn ChatGateway>) -> Self {
        Self::with_model(gateway, DEFAULT_SEARCH_MODEL)
    }

    pub fn with_model(gateway: Arc<dyn ChatGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
        }
    }
}

#[async_trait]
impl SearchProvider for PerplexitySearch {
    async fn search(
        &self,
        topic: &str,
        ctx: &RunContext,
    ) -> Result<Fetched<SearchHit>, ProviderError> {
        let req = ChatRequest::new(
            ChatModel::perplexity(&self.model),
            search_prompt(topic).to_messages(),
            ctx.attribution("agents::search"),
        );

        let resp = self.gateway.chat(req).await?;
        let hits = hits_from_response(&resp.raw_text(), &resp.content);
        if hits.is_empty() {
            tracing::warn!(topic, "search returned no content");
        }
        Ok(Fetched::new(hits, RawResponse::json(resp.raw_body)))
    }
}

#[derive(Deserialize, Default)]
struct SourceEnvelope {
    #[serde(default)]
    search_results: Vec<SourceEntry>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct SourceEntry {
    url: Option<String>,
    snippet: Option<String>,
    title: Option<String>,
}

/// Turn a Perplexity answer into hits.
///
/// Structured `search_results` win over bare `citations`; with neither, the
/// whole answer becomes one hit under [`PLACEHOLDER_URL`]. An empty answer
/// yields no hits.
pub fn hits_from_response(raw_body: &str, answer: &str) -> Vec<SearchHit> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Vec::new();
    }

    let envelope: SourceEnvelope = serde_json::from_str(raw_body).unwrap_or_default();
    let short_answer = truncate_chars(answer, CITATION_SNIPPET_CHARS);

    let structured: Vec<SearchHit> = envelope
        .search_results
        .into_iter()
        .filter_map(|entry| {
            let url = entry.url.filter(|u| !u.trim().is_empty())?;
            let snippet = entry
                .snippet
                .or(entry.title)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| short_answer.clone());
            Some(SearchHit { url, snippet })
        })
        .collect();
    if !structured.is_empty() {
        return structured;
    }

    let cited: Vec<SearchHit> = envelope
        .citations
        .into_iter()
        .filter(|url| !url.trim().is_empty())
        .map(|url| SearchHit {
            url,
            snippet: short_answer.clone(),
        })
        .collect();
    if !cited.is_empty() {
        return cited;
    }

    vec![SearchHit {
        url: PLACEHOLDER_URL.to_string(),
        snippet: answer.to_string(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_results_preferred() {
        let body = json!({
            "search_results": [
                {"url": "https://a.example", "title": "A", "snippet": "alpha"},
                {"url": "https://b.example", "title": "B"},
                {"title": "no url"}
            ],
            "citations": ["https://c.example"]
        })
        .to_string();
        let hits = hits_from_response(&body, "answer");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].snippet, "alpha");
        assert_eq!(hits[1].snippet, "B");
    }

    #[test]
    fn citations_share_truncated_answer() {
        let answer = "x".repeat(800);
        let body = json!({"citations": ["https://a.example", "https://b.example"]}).to_string();
        let hits = hits_from_response(&body, &answer);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.snippet.chars().count() == 500));
    }

    #[test]
    fn no_sources_uses_placeholder() {
        let hits = hits_from_response("{}", "  the answer  ");
        assert_eq!(
            hits,
            vec![SearchHit {
                url: PLACEHOLDER_URL.into(),
                snippet: "the answer".into()
            }]
        );
    }

    #[test]
    fn empty_answer_has_no_hits() {
        let body = json!({"citations": ["https://a.example"]}).to_string();
        assert!(hits_from_response(&body, "   ").is_empty());
    }
}
