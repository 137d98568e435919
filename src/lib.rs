#![forbid(unsafe_code)]

//! # signalpost
//!
//! Turns a research topic into social media posts for an application, and
//! never pays twice for the same answer.
//!
//! A run chains four paid API calls: web search (Perplexity), social search
//! (RapidAPI Twitter), a reviewer that distils the material into topics, and
//! an editor that writes one post per topic. Every stage's rows, together with
//! the verbatim upstream response, are stored in one SQLite file under a
//! session id. Re-running against the same session serves each stage from the
//! store and only calls out for stages that have nothing stored yet.

pub mod agents;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod session;
pub mod store;

pub use agents::{Editor, Reviewer, RunContext, SearchProvider, SocialProvider};
pub use cache::{
    AgentKind, AgentTable, CacheLookup, CachePolicy, CacheStatus, Fetched, RawResponse,
};
pub use config::RunConfig;
pub use gateway::{Attribution, ChatGateway, ProviderError, ProviderGateway, UsageSink};
pub use pipeline::{Pipeline, PipelineAgents, PipelineError, PipelineInput, PipelineOutcome};
pub use session::{resolve_session, ResolvedSession, SessionPolicy};
pub use store::{SqliteStore, StoreError};
