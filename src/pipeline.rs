//! Search (+ social) → review → edit, with every stage cached per session.
//!
//! 1. **Resolve** the session from the run's [`SessionPolicy`]
//! 2. **Gather** source material from web search and social search
//! 3. **Review** the material into distilled topics and talking points
//! 4. **Edit** the latest review into one post per topic
//!
//! Each stage asks the [`CachePolicy`] first, so a reused session only calls
//! out for the stages it has no rows for.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::{Editor, Reviewer, RunContext, SearchProvider, SocialProvider};
use crate::cache::{
    AgentKind, CacheLookup, CachePolicy, CacheStatus, EditorTable, LookupError, ReviewTable,
    SearchTable, SocialTable,
};
use crate::gateway::ProviderError;
use crate::model::{
    AppProfile, EditorPost, NewSession, ReviewOutput, SearchHit, Session, SessionId, SocialPost,
    SourceItem,
};
use crate::session::{resolve_session, SessionPolicy};
use crate::store::{SqliteStore, StoreError};

// =============================================================================
// Types
// =============================================================================

/// Collaborators for each stage. A missing search or social provider turns
/// that stage off.
#[derive(Clone)]
pub struct PipelineAgents {
    pub search: Option<Arc<dyn SearchProvider>>,
    pub social: Option<Arc<dyn SocialProvider>>,
    pub reviewer: Arc<dyn Reviewer>,
    pub editor: Arc<dyn Editor>,
}

/// Everything one run needs besides its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInput {
    pub topic: String,
    /// Social search query; the topic is used when absent.
    #[serde(default)]
    pub social_query: Option<String>,
    pub app: AppProfile,
    #[serde(default)]
    pub session: SessionPolicy,
    #[serde(default = "default_true")]
    pub run_search: bool,
    #[serde(default = "default_true")]
    pub run_social: bool,
    /// Name for a newly created session.
    #[serde(default)]
    pub session_description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl PipelineInput {
    pub fn new(topic: impl Into<String>, app: AppProfile) -> Self {
        Self {
            topic: topic.into(),
            social_query: None,
            app,
            session: SessionPolicy::default(),
            run_search: true,
            run_social: true,
            session_description: None,
        }
    }

    fn new_session(&self) -> NewSession {
        NewSession {
            description: self.session_description.clone(),
            topic: self.topic.clone(),
            app_name: self.app.name.clone(),
            app_description: self.app.description.clone(),
        }
    }

    fn social_query(&self) -> &str {
        self.social_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(&self.topic)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub run_id: Uuid,
    /// `None` when session resolution failed and the run bypassed the cache.
    pub session: Option<Session>,
    pub session_created: bool,
    pub search: Option<CacheLookup<SearchHit>>,
    pub social: Option<CacheLookup<SocialPost>>,
    pub review: CacheLookup<ReviewOutput>,
    pub posts: CacheLookup<EditorPost>,
    /// Collaborator calls made during this run; zero for a fully cached session.
    pub external_calls: usize,
}

impl PipelineOutcome {
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn review(&self) -> Option<&ReviewOutput> {
        self.review.latest()
    }

    pub fn posts(&self) -> Vec<&EditorPost> {
        self.posts.values().collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("{kind} stage failed: {source}")]
    Stage {
        kind: AgentKind,
        #[source]
        source: ProviderError,
    },
    #[error("no source material: search and social stages produced nothing")]
    NoSourceMaterial,
    #[error("{0} stage produced no output")]
    Empty(AgentKind),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    fn from_lookup(kind: AgentKind, err: LookupError) -> Self {
        match err {
            LookupError::Store(e) => Self::Store(e),
            LookupError::Provider(source) => Self::Stage { kind, source },
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Pipeline {
    cache: CachePolicy,
    agents: PipelineAgents,
}

impl Pipeline {
    pub fn new(store: SqliteStore, agents: PipelineAgents) -> Self {
        Self {
            cache: CachePolicy::new(store),
            agents,
        }
    }

    pub fn store(&self) -> &SqliteStore {
        self.cache.store()
    }

    pub async fn run(&self, input: &PipelineInput) -> Result<PipelineOutcome, PipelineError> {
        if input.topic.trim().is_empty() {
            return Err(PipelineError::InvalidInput("topic must not be empty".into()));
        }
        let run_id = Uuid::new_v4();

        // --- Session ---
        let (session, session_created) =
            match resolve_session(self.cache.store(), input.session, &input.new_session()).await {
                Ok(resolved) => {
                    let verb = if resolved.created { "created" } else { "reusing" };
                    eprintln!(
                        "[pipeline] {verb} session {} ({})",
                        resolved.session.id, resolved.session.name
                    );
                    (Some(resolved.session), resolved.created)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session resolution failed; running without cache");
                    eprintln!("[pipeline] session unavailable, results will not be cached: {e}");
                    (None, false)
                }
            };
        let session_id = session.as_ref().map(|s| s.id);
        let ctx = RunContext::new(run_id, session_id);
        let mut external_calls = 0;

        // --- Gather ---
        let search = match self.agents.search.as_ref().filter(|_| input.run_search) {
            Some(agent) => {
                eprintln!("[pipeline] searching the web for {:?}...", input.topic);
                let lookup = self
                    .cache
                    .fetch_or_load::<SearchTable, _, _>(session_id, || {
                        agent.search(&input.topic, &ctx)
                    })
                    .await
                    .map_err(|e| PipelineError::from_lookup(AgentKind::Search, e))?;
                external_calls += report(&lookup);
                Some(lookup)
            }
            None => None,
        };

        let social = match self.agents.social.as_ref().filter(|_| input.run_social) {
            Some(agent) => {
                let query = input.social_query();
                eprintln!("[pipeline] searching social posts for {query:?}...");
                let lookup = self
                    .cache
                    .fetch_or_load::<SocialTable, _, _>(session_id, || {
                        agent.search_posts(query, &ctx)
                    })
                    .await
                    .map_err(|e| PipelineError::from_lookup(AgentKind::Social, e))?;
                external_calls += report(&lookup);
                Some(lookup)
            }
            None => None,
        };

        let material: Vec<SourceItem> = search
            .iter()
            .flat_map(|l| l.values().map(SourceItem::from))
            .chain(social.iter().flat_map(|l| l.values().map(SourceItem::from)))
            .collect();
        if material.is_empty() {
            return Err(PipelineError::NoSourceMaterial);
        }

        // --- Review ---
        eprintln!("[pipeline] reviewing {} source items...", material.len());
        let review = self
            .cache
            .fetch_or_load::<ReviewTable, _, _>(session_id, || {
                self.agents.reviewer.review(&material, &input.app, &ctx)
            })
            .await
            .map_err(|e| PipelineError::from_lookup(AgentKind::Reviewer, e))?;
        external_calls += report(&review);

        let distilled = review
            .latest()
            .filter(|r| !r.distilled_topics.is_empty())
            .cloned()
            .ok_or(PipelineError::Empty(AgentKind::Reviewer))?;

        // --- Edit ---
        eprintln!(
            "[pipeline] writing posts for {} topics...",
            distilled.distilled_topics.len()
        );
        let posts = self
            .cache
            .fetch_or_load::<EditorTable, _, _>(session_id, || {
                self.agents.editor.craft(&distilled, &input.app, &ctx)
            })
            .await
            .map_err(|e| PipelineError::from_lookup(AgentKind::Editor, e))?;
        external_calls += report(&posts);
        if posts.is_empty() {
            return Err(PipelineError::Empty(AgentKind::Editor));
        }

        eprintln!(
            "[pipeline] done: {} posts, {} external calls",
            posts.len(),
            external_calls
        );

        Ok(PipelineOutcome {
            run_id,
            session,
            session_created,
            search,
            social,
            review,
            posts,
            external_calls,
        })
    }
}

/// Print a stage status line; returns 1 when the stage called out.
fn report<R>(lookup: &CacheLookup<R>) -> usize {
    let label = match lookup.status {
        CacheStatus::Hit => "cached",
        CacheStatus::Miss => "fetched",
        CacheStatus::Bypass => "fetched, not cached",
    };
    eprintln!("[pipeline]   {}: {} rows ({label})", lookup.kind, lookup.len());
    usize::from(!lookup.is_hit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_defaults_from_json() {
        let input: PipelineInput = serde_json::from_str(
            r#"{"topic": "note taking", "app": {"name": "Tuon", "description": "AI notes"}}"#,
        )
        .unwrap();
        assert!(input.run_search);
        assert!(input.run_social);
        assert_eq!(input.session, SessionPolicy::default());
        assert_eq!(input.social_query(), "note taking");
    }

    #[test]
    fn blank_social_query_falls_back_to_topic() {
        let mut input = PipelineInput::new("topic", AppProfile::default());
        input.social_query = Some("  ".into());
        assert_eq!(input.social_query(), "topic");
        input.social_query = Some("#notes".into());
        assert_eq!(input.social_query(), "#notes");
    }
}
