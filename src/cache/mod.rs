//! Session-scoped result cache for the pipeline agents.
//!
//! Each agent owns one table keyed by session id. [`tables::AgentTable`]
//! describes how rows map onto a table, and [`policy::CachePolicy`] decides
//! per (session, agent) whether to serve stored rows or call out.

pub mod policy;
pub mod tables;

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::model::SessionId;

pub use policy::{CacheLookup, CachePolicy, CacheStatus, LookupError};
pub use tables::{AgentTable, EditorTable, ReviewTable, SearchTable, SocialTable};

/// Pipeline stage that owns a result table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Search,
    Social,
    Reviewer,
    Editor,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Search,
        AgentKind::Social,
        AgentKind::Reviewer,
        AgentKind::Editor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Social => "social",
            Self::Reviewer => "reviewer",
            Self::Editor => "editor",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Search => "search_results",
            Self::Social => "social_results",
            Self::Reviewer => "reviewer_outputs",
            Self::Editor => "editor_outputs",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verbatim upstream payload, tagged with its content type.
///
/// The cache stores and returns these bytes untouched; nothing in the storage
/// layer looks inside them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    pub kind: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(kind: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            body: body.into(),
        }
    }

    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::new("application/json", body)
    }

    pub fn digest(&self) -> String {
        blake3::hash(&self.body).to_hex().to_string()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Exports carry the digest and, when the bytes are UTF-8, the text itself.
impl Serialize for RawResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("RawResponse", 4)?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("len", &self.body.len())?;
        s.serialize_field("blake3", &self.digest())?;
        s.serialize_field("text", &std::str::from_utf8(&self.body).ok())?;
        s.end()
    }
}

/// A row as persisted: the agent's structured output plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stored<R> {
    pub id: i64,
    pub session_id: SessionId,
    pub created_at: i64,
    #[serde(flatten)]
    pub row: R,
    pub raw: RawResponse,
}

/// What a collaborator returns from one external call: every row that call
/// produced plus the payload they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<R> {
    pub rows: Vec<R>,
    pub raw: RawResponse,
}

impl<R> Fetched<R> {
    pub fn new(rows: Vec<R>, raw: RawResponse) -> Self {
        Self { rows, raw }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_response_export_includes_text_only_for_utf8() {
        let text = serde_json::to_value(RawResponse::json(b"{\"a\":1}".to_vec())).unwrap();
        assert_eq!(text["text"], "{\"a\":1}");
        assert_eq!(text["len"], 7);
        assert_eq!(text["blake3"].as_str().unwrap().len(), 64);

        let raw = RawResponse::new("application/octet-stream", vec![0xff, 0xfe]);
        let binary = serde_json::to_value(raw).unwrap();
        assert!(binary["text"].is_null());
    }

    #[test]
    fn table_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            AgentKind::ALL.iter().map(|k| k.table()).collect();
        assert_eq!(names.len(), AgentKind::ALL.len());
    }
}
