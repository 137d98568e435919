//! SQLite-backed store for sessions and per-agent results.

use chrono::Utc;
use fs2::FileExt;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::cache::{
    AgentKind, AgentTable, EditorTable, RawResponse, ReviewTable, SearchTable, SocialTable, Stored,
};
use crate::model::{EditorPost, NewSession, ReviewOutput, SearchHit, Session, SessionId, SocialPost};
use crate::session::session_name;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("not found: {0}")]
    NotFound(String),
}

const SCHEMA: &str = "\
    CREATE TABLE IF NOT EXISTS sessions (\
      id INTEGER PRIMARY KEY AUTOINCREMENT,\
      session_name TEXT NOT NULL,\
      created_at INTEGER NOT NULL,\
      topic TEXT NOT NULL DEFAULT '',\
      app_name TEXT NOT NULL DEFAULT '',\
      app_description TEXT NOT NULL DEFAULT ''\
    );\
    CREATE TABLE IF NOT EXISTS search_results (\
      id INTEGER PRIMARY KEY AUTOINCREMENT,\
      session_id INTEGER NOT NULL REFERENCES sessions(id),\
      url TEXT NOT NULL CHECK (length(url) > 0),\
      snippet TEXT NOT NULL,\
      created_at INTEGER NOT NULL,\
      raw_kind TEXT NOT NULL,\
      raw_body BLOB NOT NULL\
    );\
    CREATE TABLE IF NOT EXISTS social_results (\
      id INTEGER PRIMARY KEY AUTOINCREMENT,\
      session_id INTEGER NOT NULL REFERENCES sessions(id),\
      url TEXT NOT NULL CHECK (length(url) > 0),\
      snippet TEXT NOT NULL,\
      handle TEXT NOT NULL,\
      followers_count INTEGER NOT NULL DEFAULT 0 CHECK (followers_count >= 0),\
      like_count INTEGER NOT NULL DEFAULT 0 CHECK (like_count >= 0),\
      quote_count INTEGER NOT NULL DEFAULT 0 CHECK (quote_count >= 0),\
      reply_count INTEGER NOT NULL DEFAULT 0 CHECK (reply_count >= 0),\
      repost_count INTEGER NOT NULL DEFAULT 0 CHECK (repost_count >= 0),\
      posted_at TEXT,\
      created_at INTEGER NOT NULL,\
      raw_kind TEXT NOT NULL,\
      raw_body BLOB NOT NULL\
    );\
    CREATE TABLE IF NOT EXISTS reviewer_outputs (\
      id INTEGER PRIMARY KEY AUTOINCREMENT,\
      session_id INTEGER NOT NULL REFERENCES sessions(id),\
      distilled_topics TEXT NOT NULL,\
      talking_points TEXT NOT NULL,\
      created_at INTEGER NOT NULL,\
      raw_kind TEXT NOT NULL,\
      raw_body BLOB NOT NULL\
    );\
    CREATE TABLE IF NOT EXISTS editor_outputs (\
      id INTEGER PRIMARY KEY AUTOINCREMENT,\
      session_id INTEGER NOT NULL REFERENCES sessions(id),\
      topic TEXT NOT NULL CHECK (length(topic) > 0),\
      post TEXT NOT NULL,\
      created_at INTEGER NOT NULL,\
      raw_kind TEXT NOT NULL,\
      raw_body BLOB NOT NULL\
    );\
    CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at, id);\
    CREATE INDEX IF NOT EXISTS idx_search_session ON search_results(session_id, created_at);\
    CREATE INDEX IF NOT EXISTS idx_social_session ON social_results(session_id, created_at);\
    CREATE INDEX IF NOT EXISTS idx_reviewer_session ON reviewer_outputs(session_id, created_at);\
    CREATE INDEX IF NOT EXISTS idx_editor_session ON editor_outputs(session_id, created_at);";

/// Row counts per agent table for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub search_results: i64,
    pub social_results: i64,
    pub reviewer_outputs: i64,
    pub editor_outputs: i64,
}

/// Everything stored for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionExport {
    pub session: Session,
    pub search_results: Vec<Stored<SearchHit>>,
    pub social_results: Vec<Stored<SocialPost>>,
    pub reviewer_outputs: Vec<Stored<ReviewOutput>>,
    pub editor_outputs: Vec<Stored<EditorPost>>,
}

/// Result of [`SqliteStore::save_if_empty`].
#[derive(Debug, Clone)]
pub enum SaveOutcome<R> {
    /// The rows were written; these are the stored rows.
    Inserted(Vec<Stored<R>>),
    /// Another writer got there first; nothing was written and these are its rows.
    Existing(Vec<Stored<R>>),
}

#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA foreign_keys=ON;\
             PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("SIGNALPOST_DB_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".signalpost_cache.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Advisory lock on `<db>.lock`, held until the guard drops.
    pub fn lock_exclusive(&self) -> Result<StoreLock, StoreError> {
        StoreLock::new(&self.path)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError>,
    {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_conn(f))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    pub async fn create_session(&self, new: &NewSession) -> Result<Session, StoreError> {
        let new = new.clone();
        self.blocking(move |conn| {
            let now = Utc::now();
            let name = session_name(new.description.as_deref(), now);
            let created_at = now.timestamp();
            conn.execute(
                "INSERT INTO sessions (session_name, created_at, topic, app_name, app_description) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, created_at, new.topic, new.app_name, new.app_description],
            )?;
            Ok(Session {
                id: conn.last_insert_rowid(),
                name,
                created_at,
                topic: new.topic,
                app_name: new.app_name,
                app_description: new.app_description,
            })
        })
        .await
    }

    /// Most recently created session; ties on timestamp go to the higher id.
    pub async fn latest_session(&self) -> Result<Option<Session>, StoreError> {
        self.blocking(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, session_name, created_at, topic, app_name, app_description \
                     FROM sessions ORDER BY created_at DESC, id DESC LIMIT 1",
                    [],
                    row_to_session,
                )
                .optional()?)
        })
        .await
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<Session, StoreError> {
        self.blocking(move |conn| select_session(conn, session_id)).await
    }

    /// All sessions, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_name, created_at, topic, app_name, app_description \
                 FROM sessions ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map([], row_to_session)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// All sessions with per-table row counts, newest first.
    pub async fn session_summaries(&self) -> Result<Vec<SessionSummary>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.session_name, s.created_at, s.topic, s.app_name, s.app_description, \
                        (SELECT COUNT(*) FROM search_results WHERE session_id = s.id), \
                        (SELECT COUNT(*) FROM social_results WHERE session_id = s.id), \
                        (SELECT COUNT(*) FROM reviewer_outputs WHERE session_id = s.id), \
                        (SELECT COUNT(*) FROM editor_outputs WHERE session_id = s.id) \
                 FROM sessions s ORDER BY s.created_at DESC, s.id DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SessionSummary {
                    session: row_to_session(row)?,
                    search_results: row.get(6)?,
                    social_results: row.get(7)?,
                    reviewer_outputs: row.get(8)?,
                    editor_outputs: row.get(9)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Agent results
    // -------------------------------------------------------------------------

    /// Persist every row from one external call in a single transaction.
    ///
    /// Any failing row (constraint violation, unknown session) rolls the whole
    /// call back, so a later `load` sees either all rows or none.
    pub async fn save<T: AgentTable>(
        &self,
        session_id: SessionId,
        rows: Vec<T::Row>,
        raw: RawResponse,
    ) -> Result<usize, StoreError> {
        self.blocking(move |conn| {
            let created_at = Utc::now().timestamp();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for row in &rows {
                T::insert(&tx, session_id, created_at, row, &raw)?;
            }
            tx.commit()?;
            Ok(rows.len())
        })
        .await
    }

    /// Like [`save`](Self::save), but only when `T` has no rows for the
    /// session yet.
    ///
    /// The emptiness check and the inserts share one `BEGIN IMMEDIATE`
    /// transaction, so concurrent writers (threads or processes) on the same
    /// (session, agent) leave exactly one result set.
    pub async fn save_if_empty<T: AgentTable>(
        &self,
        session_id: SessionId,
        rows: Vec<T::Row>,
        raw: RawResponse,
    ) -> Result<SaveOutcome<T::Row>, StoreError> {
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing = T::select(&tx, session_id)?;
            if !existing.is_empty() {
                return Ok(SaveOutcome::Existing(existing));
            }
            let created_at = Utc::now().timestamp();
            for row in &rows {
                T::insert(&tx, session_id, created_at, row, &raw)?;
            }
            let stored = T::select(&tx, session_id)?;
            tx.commit()?;
            Ok(SaveOutcome::Inserted(stored))
        })
        .await
    }

    pub async fn load<T: AgentTable>(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Stored<T::Row>>, StoreError> {
        self.blocking(move |conn| T::select(conn, session_id)).await
    }

    pub async fn count(&self, kind: AgentKind, session_id: SessionId) -> Result<i64, StoreError> {
        self.blocking(move |conn| {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE session_id = ?1", kind.table());
            Ok(conn.query_row(&sql, params![session_id], |row| row.get(0))?)
        })
        .await
    }

    /// The session and all of its rows, read from one snapshot.
    pub async fn export_session(&self, session_id: SessionId) -> Result<SessionExport, StoreError> {
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let export = SessionExport {
                session: select_session(&tx, session_id)?,
                search_results: SearchTable::select(&tx, session_id)?,
                social_results: SocialTable::select(&tx, session_id)?,
                reviewer_outputs: ReviewTable::select(&tx, session_id)?,
                editor_outputs: EditorTable::select(&tx, session_id)?,
            };
            tx.commit()?;
            Ok(export)
        })
        .await
    }

    /// Drop every table and recreate the empty schema.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.blocking(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(
                "DROP TABLE IF EXISTS editor_outputs;\
                 DROP TABLE IF EXISTS reviewer_outputs;\
                 DROP TABLE IF EXISTS social_results;\
                 DROP TABLE IF EXISTS search_results;\
                 DROP TABLE IF EXISTS sessions;",
            )?;
            tx.execute_batch(SCHEMA)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

fn select_session(conn: &Connection, session_id: SessionId) -> Result<Session, StoreError> {
    conn.query_row(
        "SELECT id, session_name, created_at, topic, app_name, app_description \
         FROM sessions WHERE id = ?1",
        params![session_id],
        row_to_session,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        topic: row.get(3)?,
        app_name: row.get(4)?,
        app_description: row.get(5)?,
    })
}

#[derive(Debug)]
pub struct StoreLock {
    _file: std::fs::File,
}

impl StoreLock {
    fn new(db_path: &Path) -> Result<Self, StoreError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = SqliteStore::new(dir.path().join("store.sqlite")).expect("create store");
        (dir, store)
    }

    fn new_session(topic: &str) -> NewSession {
        NewSession {
            description: None,
            topic: topic.to_string(),
            app_name: "Notebook".to_string(),
            app_description: "a notes app".to_string(),
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (_dir, store) = temp_store();
        assert!(store.latest_session().await.unwrap().is_none());

        let first = store.create_session(&new_session("first")).await.unwrap();
        let second = store.create_session(&new_session("second")).await.unwrap();
        assert!(second.id > first.id);
        assert!(first.name.starts_with("Content Generation - "));

        let latest = store.latest_session().await.unwrap().unwrap();
        assert_eq!(latest, second);

        let fetched = store.get_session(first.id).await.unwrap();
        assert_eq!(fetched.topic, "first");

        let listed = store.list_sessions().await.unwrap();
        assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_get_missing_session_is_not_found() {
        let (_dir, store) = temp_store();
        let err = store.get_session(42).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_description_becomes_session_name() {
        let (_dir, store) = temp_store();
        let mut new = new_session("topic");
        new.description = Some("launch week batch".to_string());
        let session = store.create_session(&new).await.unwrap();
        assert_eq!(session.name, "launch week batch");
    }

    #[tokio::test]
    async fn test_schema_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite");
        let store = SqliteStore::new(&path).unwrap();
        store.create_session(&new_session("kept")).await.unwrap();
        drop(store);

        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(reopened.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_count_per_table() {
        let (_dir, store) = temp_store();
        let session = store.create_session(&new_session("t")).await.unwrap();
        let hits = vec![
            SearchHit {
                url: "https://a.example".into(),
                snippet: "a".into(),
            },
            SearchHit {
                url: "https://b.example".into(),
                snippet: "b".into(),
            },
        ];
        store
            .save::<SearchTable>(session.id, hits, RawResponse::json(b"{}".to_vec()))
            .await
            .unwrap();
        assert_eq!(store.count(AgentKind::Search, session.id).await.unwrap(), 2);
        assert_eq!(store.count(AgentKind::Editor, session.id).await.unwrap(), 0);
    }
}
