use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use signalpost::cache::{AgentKind, CacheStatus, Fetched, RawResponse};
use signalpost::model::{
    AppProfile, EditorPost, Engagement, ReviewOutput, SearchHit, SocialPost, SourceItem,
};
use signalpost::{
    Editor, Pipeline, PipelineAgents, PipelineError, PipelineInput, ProviderError, Reviewer,
    RunContext, SearchProvider, SessionPolicy, SocialProvider, SqliteStore,
};
use tempfile::tempdir;

#[derive(Default)]
struct Counters {
    search: AtomicUsize,
    social: AtomicUsize,
    review: AtomicUsize,
    edit: AtomicUsize,
    /// Material sizes seen by the reviewer, last call wins.
    review_material: AtomicUsize,
    fail_editor: AtomicBool,
    empty_sources: AtomicBool,
}

impl Counters {
    fn total(&self) -> usize {
        self.search.load(Ordering::SeqCst)
            + self.social.load(Ordering::SeqCst)
            + self.review.load(Ordering::SeqCst)
            + self.edit.load(Ordering::SeqCst)
    }
}

struct MockSearch(Arc<Counters>);

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(
        &self,
        topic: &str,
        _ctx: &RunContext,
    ) -> Result<Fetched<SearchHit>, ProviderError> {
        self.0.search.fetch_add(1, Ordering::SeqCst);
        if self.0.empty_sources.load(Ordering::SeqCst) {
            return Ok(Fetched::new(Vec::new(), RawResponse::default()));
        }
        let hits = vec![
            SearchHit {
                url: "https://a.example/notes".to_string(),
                snippet: format!("{topic}: sync is slow"),
            },
            SearchHit {
                url: "https://b.example/ai".to_string(),
                snippet: "AI summaries miss context".to_string(),
            },
        ];
        Ok(Fetched::new(hits, RawResponse::json(br#"{"id":"search"}"#.to_vec())))
    }
}

struct MockSocial(Arc<Counters>);

#[async_trait]
impl SocialProvider for MockSocial {
    async fn search_posts(
        &self,
        query: &str,
        _ctx: &RunContext,
    ) -> Result<Fetched<SocialPost>, ProviderError> {
        self.0.social.fetch_add(1, Ordering::SeqCst);
        if self.0.empty_sources.load(Ordering::SeqCst) {
            return Ok(Fetched::new(Vec::new(), RawResponse::default()));
        }
        let post = SocialPost {
            url: "https://twitter.com/alice/status/42".to_string(),
            snippet: format!("anyone else frustrated with {query}?"),
            handle: "alice".to_string(),
            metrics: Engagement {
                followers: 900,
                likes: 12,
                ..Engagement::default()
            },
            posted_at: None,
        };
        Ok(Fetched::new(vec![post], RawResponse::json(br#"{"id":"social"}"#.to_vec())))
    }
}

struct MockReviewer(Arc<Counters>);

#[async_trait]
impl Reviewer for MockReviewer {
    async fn review(
        &self,
        material: &[SourceItem],
        _app: &AppProfile,
        _ctx: &RunContext,
    ) -> Result<Fetched<ReviewOutput>, ProviderError> {
        self.0.review.fetch_add(1, Ordering::SeqCst);
        self.0.review_material.store(material.len(), Ordering::SeqCst);
        let review = ReviewOutput {
            distilled_topics: vec!["Slow sync".to_string(), "Shallow AI".to_string()],
            talking_points: vec!["Offline first".to_string()],
        };
        Ok(Fetched::new(vec![review], RawResponse::json(br#"{"id":"review"}"#.to_vec())))
    }
}

struct MockEditor(Arc<Counters>);

#[async_trait]
impl Editor for MockEditor {
    async fn craft(
        &self,
        review: &ReviewOutput,
        app: &AppProfile,
        _ctx: &RunContext,
    ) -> Result<Fetched<EditorPost>, ProviderError> {
        self.0.edit.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_editor.load(Ordering::SeqCst) {
            return Err(ProviderError::upstream("openrouter", "upstream exploded"));
        }
        let posts = review
            .distilled_topics
            .iter()
            .map(|topic| EditorPost {
                topic: topic.clone(),
                post: format!("{topic}? {} fixes it.", app.name),
            })
            .collect();
        Ok(Fetched::new(posts, RawResponse::json(br#"{"id":"edit"}"#.to_vec())))
    }
}

fn agents(counters: &Arc<Counters>) -> PipelineAgents {
    PipelineAgents {
        search: Some(Arc::new(MockSearch(counters.clone()))),
        social: Some(Arc::new(MockSocial(counters.clone()))),
        reviewer: Arc::new(MockReviewer(counters.clone())),
        editor: Arc::new(MockEditor(counters.clone())),
    }
}

fn input(policy: SessionPolicy) -> PipelineInput {
    let mut input = PipelineInput::new(
        "note-taking pain points",
        AppProfile {
            name: "Tuon.io".to_string(),
            description: "AI notes".to_string(),
            features: None,
        },
    );
    input.social_query = Some("AI in notes".to_string());
    input.session = policy;
    input
}

#[tokio::test]
async fn second_run_on_reused_session_makes_no_calls() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("store.sqlite")).unwrap();
    let counters = Arc::new(Counters::default());
    let pipeline = Pipeline::new(store.clone(), agents(&counters));

    let first = pipeline.run(&input(SessionPolicy::force_new())).await.unwrap();
    assert_eq!(first.session_id(), Some(1));
    assert!(first.session_created);
    assert_eq!(first.external_calls, 4);
    assert_eq!(counters.total(), 4);
    assert_eq!(counters.review_material.load(Ordering::SeqCst), 3);
    assert_eq!(first.posts().len(), 2);
    assert_eq!(first.review.status, CacheStatus::Miss);

    let second = pipeline.run(&input(SessionPolicy::reuse_latest())).await.unwrap();
    assert_eq!(second.session_id(), Some(1));
    assert!(!second.session_created);
    assert_eq!(second.external_calls, 0);
    assert_eq!(counters.total(), 4);
    assert!(second.review.is_hit() && second.posts.is_hit());
    assert_eq!(second.posts(), first.posts());
    assert_eq!(second.review(), first.review());
    assert_eq!(
        second.search.as_ref().unwrap().rows,
        first.search.as_ref().unwrap().rows
    );

    assert_eq!(store.count(AgentKind::Search, 1).await.unwrap(), 2);
    assert_eq!(store.count(AgentKind::Editor, 1).await.unwrap(), 2);
}

#[tokio::test]
async fn forced_new_session_calls_out_again() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("store.sqlite")).unwrap();
    let counters = Arc::new(Counters::default());
    let pipeline = Pipeline::new(store, agents(&counters));

    pipeline.run(&input(SessionPolicy::force_new())).await.unwrap();
    let second = pipeline.run(&input(SessionPolicy::force_new())).await.unwrap();
    assert_eq!(second.session_id(), Some(2));
    assert_eq!(second.external_calls, 4);
    assert_eq!(counters.total(), 8);
}

#[tokio::test]
async fn failed_stage_keeps_earlier_rows_and_resumes() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("store.sqlite")).unwrap();
    let counters = Arc::new(Counters::default());
    let pipeline = Pipeline::new(store.clone(), agents(&counters));

    counters.fail_editor.store(true, Ordering::SeqCst);
    let err = pipeline
        .run(&input(SessionPolicy::force_new()))
        .await
        .unwrap_err();
    match err {
        PipelineError::Stage { kind, source } => {
            assert_eq!(kind, AgentKind::Editor);
            assert!(source.is_retryable());
        }
        other => panic!("expected editor stage error, got {other:?}"),
    }
    assert_eq!(store.count(AgentKind::Reviewer, 1).await.unwrap(), 1);
    assert_eq!(store.count(AgentKind::Editor, 1).await.unwrap(), 0);

    counters.fail_editor.store(false, Ordering::SeqCst);
    let resumed = pipeline
        .run(&input(SessionPolicy::reuse_latest()))
        .await
        .unwrap();
    assert_eq!(resumed.session_id(), Some(1));
    assert_eq!(resumed.external_calls, 1);
    assert!(resumed.review.is_hit());
    assert_eq!(resumed.posts.status, CacheStatus::Miss);
    assert_eq!(counters.search.load(Ordering::SeqCst), 1);
    assert_eq!(counters.review.load(Ordering::SeqCst), 1);
    assert_eq!(counters.edit.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn skipped_social_stage_is_not_called() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("store.sqlite")).unwrap();
    let counters = Arc::new(Counters::default());
    let pipeline = Pipeline::new(store, agents(&counters));

    let mut run = input(SessionPolicy::force_new());
    run.run_social = false;
    let outcome = pipeline.run(&run).await.unwrap();
    assert!(outcome.social.is_none());
    assert_eq!(counters.social.load(Ordering::SeqCst), 0);
    assert_eq!(counters.review_material.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.external_calls, 3);
}

#[tokio::test]
async fn no_source_material_stops_before_review() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("store.sqlite")).unwrap();
    let counters = Arc::new(Counters::default());
    counters.empty_sources.store(true, Ordering::SeqCst);
    let pipeline = Pipeline::new(store.clone(), agents(&counters));

    let err = pipeline
        .run(&input(SessionPolicy::force_new()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoSourceMaterial));
    assert_eq!(counters.review.load(Ordering::SeqCst), 0);
    assert_eq!(store.count(AgentKind::Search, 1).await.unwrap(), 0);
}

#[tokio::test]
async fn empty_topic_is_rejected_without_calls() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("store.sqlite")).unwrap();
    let counters = Arc::new(Counters::default());
    let pipeline = Pipeline::new(store.clone(), agents(&counters));

    let mut run = input(SessionPolicy::force_new());
    run.topic = "   ".to_string();
    let err = pipeline.run(&run).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert_eq!(counters.total(), 0);
    assert!(store.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn broken_store_runs_without_cache() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.sqlite");
    let store = SqliteStore::new(&path).unwrap();
    Connection::open(&path)
        .unwrap()
        .execute_batch("DROP TABLE sessions;")
        .unwrap();

    let counters = Arc::new(Counters::default());
    let pipeline = Pipeline::new(store, agents(&counters));
    let outcome = pipeline
        .run(&input(SessionPolicy::reuse_latest()))
        .await
        .unwrap();

    assert_eq!(outcome.session_id(), None);
    assert_eq!(outcome.external_calls, 4);
    assert_eq!(outcome.posts.status, CacheStatus::Bypass);
    assert_eq!(outcome.posts().len(), 2);
}
