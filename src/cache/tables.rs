//! Row mappings for the four per-agent result tables.

use std::fmt;

use rusqlite::{params, Connection, Row};

use super::{AgentKind, RawResponse, Stored};
use crate::model::{EditorPost, Engagement, ReviewOutput, SearchHit, SessionId, SocialPost};
use crate::store::StoreError;

/// Maps one agent's structured output onto its SQLite table.
///
/// `insert` runs inside the caller's transaction; it must not commit.
/// `select` returns rows in insertion order (created_at, then id).
pub trait AgentTable: Send + Sync + 'static {
    const KIND: AgentKind;
    type Row: Clone + Send + Sync + fmt::Debug + 'static;

    fn insert(
        conn: &Connection,
        session_id: SessionId,
        created_at: i64,
        row: &Self::Row,
        raw: &RawResponse,
    ) -> Result<(), StoreError>;

    fn select(conn: &Connection, session_id: SessionId)
        -> Result<Vec<Stored<Self::Row>>, StoreError>;
}

pub struct SearchTable;
pub struct SocialTable;
pub struct ReviewTable;
pub struct EditorTable;

fn raw_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<RawResponse> {
    Ok(RawResponse {
        kind: row.get(idx)?,
        body: row.get(idx + 1)?,
    })
}

impl AgentTable for SearchTable {
    const KIND: AgentKind = AgentKind::Search;
    type Row = SearchHit;

    fn insert(
        conn: &Connection,
        session_id: SessionId,
        created_at: i64,
        row: &SearchHit,
        raw: &RawResponse,
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO search_results (session_id, url, snippet, created_at, raw_kind, raw_body) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session_id, row.url, row.snippet, created_at, raw.kind, raw.body],
        )?;
        Ok(())
    }

    fn select(
        conn: &Connection,
        session_id: SessionId,
    ) -> Result<Vec<Stored<SearchHit>>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, created_at, url, snippet, raw_kind, raw_body \
             FROM search_results WHERE session_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(Stored {
                id: row.get(0)?,
                session_id: row.get(1)?,
                created_at: row.get(2)?,
                row: SearchHit {
                    url: row.get(3)?,
                    snippet: row.get(4)?,
                },
                raw: raw_at(row, 5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl AgentTable for SocialTable {
    const KIND: AgentKind = AgentKind::Social;
    type Row = SocialPost;

    fn insert(
        conn: &Connection,
        session_id: SessionId,
        created_at: i64,
        row: &SocialPost,
        raw: &RawResponse,
    ) -> Result<(), StoreError> {
        let m = &row.metrics;
        conn.execute(
            "INSERT INTO social_results ( \
                session_id, url, snippet, handle, followers_count, like_count, quote_count, \
                reply_count, repost_count, posted_at, created_at, raw_kind, raw_body \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                session_id,
                row.url,
                row.snippet,
                row.handle,
                m.followers,
                m.likes,
                m.quotes,
                m.replies,
                m.reposts,
                row.posted_at,
                created_at,
                raw.kind,
                raw.body,
            ],
        )?;
        Ok(())
    }

    fn select(
        conn: &Connection,
        session_id: SessionId,
    ) -> Result<Vec<Stored<SocialPost>>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, created_at, url, snippet, handle, followers_count, like_count, \
                    quote_count, reply_count, repost_count, posted_at, raw_kind, raw_body \
             FROM social_results WHERE session_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(Stored {
                id: row.get(0)?,
                session_id: row.get(1)?,
                created_at: row.get(2)?,
                row: SocialPost {
                    url: row.get(3)?,
                    snippet: row.get(4)?,
                    handle: row.get(5)?,
                    metrics: Engagement {
                        followers: row.get(6)?,
                        likes: row.get(7)?,
                        quotes: row.get(8)?,
                        replies: row.get(9)?,
                        reposts: row.get(10)?,
                    },
                    posted_at: row.get(11)?,
                },
                raw: raw_at(row, 12)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl AgentTable for ReviewTable {
    const KIND: AgentKind = AgentKind::Reviewer;
    type Row = ReviewOutput;

    fn insert(
        conn: &Connection,
        session_id: SessionId,
        created_at: i64,
        row: &ReviewOutput,
        raw: &RawResponse,
    ) -> Result<(), StoreError> {
        let topics = serde_json::to_string(&row.distilled_topics)
            .map_err(|e| StoreError::Serde(e.to_string()))?;
        let points = serde_json::to_string(&row.talking_points)
            .map_err(|e| StoreError::Serde(e.to_string()))?;
        conn.execute(
            "INSERT INTO reviewer_outputs ( \
                session_id, distilled_topics, talking_points, created_at, raw_kind, raw_body \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session_id, topics, points, created_at, raw.kind, raw.body],
        )?;
        Ok(())
    }

    fn select(
        conn: &Connection,
        session_id: SessionId,
    ) -> Result<Vec<Stored<ReviewOutput>>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, created_at, distilled_topics, talking_points, raw_kind, raw_body \
             FROM reviewer_outputs WHERE session_id = ?1 ORDER BY created_at, id",
        )?;
        let mut rows = stmt.query(params![session_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let topics: String = row.get(3)?;
            let points: String = row.get(4)?;
            out.push(Stored {
                id: row.get(0)?,
                session_id: row.get(1)?,
                created_at: row.get(2)?,
                row: ReviewOutput {
                    distilled_topics: serde_json::from_str(&topics)
                        .map_err(|e| StoreError::Serde(e.to_string()))?,
                    talking_points: serde_json::from_str(&points)
                        .map_err(|e| StoreError::Serde(e.to_string()))?,
                },
                raw: raw_at(row, 5)?,
            });
        }
        Ok(out)
    }
}

impl AgentTable for EditorTable {
    const KIND: AgentKind = AgentKind::Editor;
    type Row = EditorPost;

    fn insert(
        conn: &Connection,
        session_id: SessionId,
        created_at: i64,
        row: &EditorPost,
        raw: &RawResponse,
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO editor_outputs (session_id, topic, post, created_at, raw_kind, raw_body) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session_id, row.topic, row.post, created_at, raw.kind, raw.body],
        )?;
        Ok(())
    }

    fn select(
        conn: &Connection,
        session_id: SessionId,
    ) -> Result<Vec<Stored<EditorPost>>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, created_at, topic, post, raw_kind, raw_body \
             FROM editor_outputs WHERE session_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(Stored {
                id: row.get(0)?,
                session_id: row.get(1)?,
                created_at: row.get(2)?,
                row: EditorPost {
                    topic: row.get(3)?,
                    post: row.get(4)?,
                },
                raw: raw_at(row, 5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
