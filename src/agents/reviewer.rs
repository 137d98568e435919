use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::parse::parse_reply;
use super::{Reviewer, RunContext};
use crate::cache::{Fetched, RawResponse};
use crate::gateway::{ChatGateway, ChatModel, ChatRequest, Provider, ProviderError};
use crate::model::{AppProfile, ReviewOutput, SourceItem};
use crate::prompts::reviewer_prompt;

pub const DEFAULT_REVIEWER_MODEL: &str = "google/gemini-2.5-flash";

const PROVIDER: &str = Provider::OpenRouter.as_str();

/// Distils source material into topics and talking points with one JSON-mode
/// chat call.
pub struct LlmReviewer {
    gateway: Arc<dyn ChatGateway>,
    model: String,
}

impl LlmReviewer {
    pub fn new(gateway: Arc<dyn ChatGateway>) -> Self {
        Self::with_model(gateway, DEFAULT_REVIEWER_MODEL)
    }

    pub fn with_model(gateway: Arc<dyn ChatGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
        }
    }
}

#[derive(Deserialize)]
struct ReviewReply {
    #[serde(default)]
    distilled_topics: Vec<String>,
    #[serde(default)]
    talking_points: Vec<String>,
}

#[async_trait]
impl Reviewer for LlmReviewer {
    async fn review(
        &self,
        material: &[SourceItem],
        app: &AppProfile,
        ctx: &RunContext,
    ) -> Result<Fetched<ReviewOutput>, ProviderError> {
        let req = ChatRequest::new(
            ChatModel::openrouter(&self.model),
            reviewer_prompt(material, app).to_messages(),
            ctx.attribution("agents::reviewer"),
        )
        .temperature(0.2)
        .max_tokens(4096)
        .json();

        let resp = self.gateway.chat(req).await?;
        let reply: ReviewReply = parse_reply(PROVIDER, &resp.content)?;

        let clean = |items: Vec<String>| {
            items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        };
        let output = ReviewOutput {
            distilled_topics: clean(reply.distilled_topics),
            talking_points: clean(reply.talking_points),
        };

        // Topic-less reviews are never cached.
        let rows = if output.distilled_topics.is_empty() {
            tracing::warn!(model = %self.model, "reviewer returned no distilled topics");
            Vec::new()
        } else {
            vec![output]
        };
        Ok(Fetched::new(rows, RawResponse::json(resp.raw_body)))
    }
}
