//! External collaborators behind each pipeline stage.
//!
//! The traits are the seam the pipeline depends on; the concrete agents talk
//! to Perplexity, RapidAPI and OpenRouter. Each call returns every row it
//! produced together with the verbatim upstream payload.

pub mod editor;
pub mod parse;
pub mod reviewer;
pub mod search;
pub mod social;

use async_trait::async_trait;
use uuid::Uuid;

use crate::cache::Fetched;
use crate::gateway::{Attribution, ProviderError};
use crate::model::{
    AppProfile, EditorPost, ReviewOutput, SearchHit, SessionId, SocialPost, SourceItem,
};

pub use editor::LlmEditor;
pub use reviewer::LlmReviewer;
pub use search::PerplexitySearch;
pub use social::RapidApiTwitter;

/// Identifies the run (and session, when there is one) an agent call belongs
/// to, for usage attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: Uuid,
    pub session_id: Option<SessionId>,
}

impl RunContext {
    pub fn new(run_id: Uuid, session_id: Option<SessionId>) -> Self {
        Self { run_id, session_id }
    }

    pub fn attribution(&self, caller: &'static str) -> Attribution {
        Attribution::new(caller)
            .with_run(self.run_id)
            .with_session(self.session_id)
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        topic: &str,
        ctx: &RunContext,
    ) -> Result<Fetched<SearchHit>, ProviderError>;
}

#[async_trait]
pub trait SocialProvider: Send + Sync {
    async fn search_posts(
        &self,
        query: &str,
        ctx: &RunContext,
    ) -> Result<Fetched<SocialPost>, ProviderError>;
}

#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(
        &self,
        material: &[SourceItem],
        app: &AppProfile,
        ctx: &RunContext,
    ) -> Result<Fetched<ReviewOutput>, ProviderError>;
}

#[async_trait]
pub trait Editor: Send + Sync {
    async fn craft(
        &self,
        review: &ReviewOutput,
        app: &AppProfile,
        ctx: &RunContext,
    ) -> Result<Fetched<EditorPost>, ProviderError>;
}
