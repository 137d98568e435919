use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::parse::parse_reply;
use super::{Editor, RunContext};
use crate::cache::{Fetched, RawResponse};
use crate::gateway::{ChatGateway, ChatModel, ChatRequest, Provider, ProviderError};
use crate::model::{AppProfile, EditorPost, ReviewOutput};
use crate::prompts::editor_prompt;

pub const DEFAULT_EDITOR_MODEL: &str = "google/gemini-2.5-pro";

const PROVIDER: &str = Provider::OpenRouter.as_str();

/// Writes one post per distilled topic in a single JSON-mode chat call.
pub struct LlmEditor {
    gateway: Arc<dyn ChatGateway>,
    model: String,
}

impl LlmEditor {
    pub fn new(gateway: Arc<dyn ChatGateway>) -> Self {
        Self::with_model(gateway, DEFAULT_EDITOR_MODEL)
    }

    pub fn with_model(gateway: Arc<dyn ChatGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
        }
    }
}

#[derive(Deserialize)]
struct EditorReply {
    #[serde(default)]
    posts: Vec<PostReply>,
}

#[derive(Deserialize)]
struct PostReply {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    post: String,
}

#[async_trait]
impl Editor for LlmEditor {
    async fn craft(
        &self,
        review: &ReviewOutput,
        app: &AppProfile,
        ctx: &RunContext,
    ) -> Result<Fetched<EditorPost>, ProviderError> {
        if review.distilled_topics.is_empty() {
            tracing::warn!("no distilled topics for the editor");
            return Ok(Fetched::new(Vec::new(), RawResponse::default()));
        }

        let req = ChatRequest::new(
            ChatModel::openrouter(&self.model),
            editor_prompt(review, app).to_messages(),
            ctx.attribution("agents::editor"),
        )
        .temperature(0.7)
        .max_tokens(8192)
        .json();

        let resp = self.gateway.chat(req).await?;
        let reply: EditorReply = parse_reply(PROVIDER, &resp.content)?;
        let posts = posts_for_topics(reply.posts, &review.distilled_topics);
        Ok(Fetched::new(posts, RawResponse::json(resp.raw_body)))
    }
}

/// Posts with empty bodies are dropped. A post that comes back without a
/// topic takes the distilled topic at the same position.
fn posts_for_topics(replies: Vec<PostReply>, topics: &[String]) -> Vec<EditorPost> {
    replies
        .into_iter()
        .enumerate()
        .filter_map(|(i, reply)| {
            let post = reply.post.trim().to_string();
            if post.is_empty() {
                return None;
            }
            let topic = Some(reply.topic.trim().to_string())
                .filter(|t| !t.is_empty())
                .or_else(|| topics.get(i).cloned())?;
            Some(EditorPost { topic, post })
        })
        .collect()
}
