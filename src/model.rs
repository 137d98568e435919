//! Records persisted by the session store and produced by the agents.

use serde::{Deserialize, Serialize};

pub type SessionId = i64;

/// One logical pipeline run. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    /// Unix seconds.
    pub created_at: i64,
    pub topic: String,
    pub app_name: String,
    pub app_description: String,
}

/// Fields supplied when a session is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    /// Used as the session name when present; otherwise the name is derived
    /// from the creation time.
    pub description: Option<String>,
    pub topic: String,
    pub app_name: String,
    pub app_description: String,
}

/// A web search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub snippet: String,
}

/// Engagement counters reported by the social provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub followers: i64,
    pub likes: i64,
    pub quotes: i64,
    pub replies: i64,
    pub reposts: i64,
}

/// A social media post returned by the social search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialPost {
    pub url: String,
    pub snippet: String,
    pub handle: String,
    pub metrics: Engagement,
    /// Creation time as the provider reports it; format varies by provider.
    pub posted_at: Option<String>,
}

/// Distilled material produced by the reviewer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub distilled_topics: Vec<String>,
    pub talking_points: Vec<String>,
}

/// A generated post for one distilled topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorPost {
    pub topic: String,
    pub post: String,
}

/// The application the generated content promotes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppProfile {
    pub name: String,
    pub description: String,
    /// Free-form feature notes handed to the reviewer and editor.
    #[serde(default)]
    pub features: Option<String>,
}

/// A piece of source material handed to the reviewer, from either search
/// or social results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceItem {
    pub url: String,
    pub snippet: String,
    pub handle: Option<String>,
}

impl From<&SearchHit> for SourceItem {
    fn from(hit: &SearchHit) -> Self {
        Self {
            url: hit.url.clone(),
            snippet: hit.snippet.clone(),
            handle: None,
        }
    }
}

impl From<&SocialPost> for SourceItem {
    fn from(post: &SocialPost) -> Self {
        Self {
            url: post.url.clone(),
            snippet: post.snippet.clone(),
            handle: Some(post.handle.clone()),
        }
    }
}
