//! Per-(session, agent) decision between stored rows and a fresh call.

use std::future::Future;

use serde::Serialize;

use super::{AgentKind, AgentTable, Fetched, Stored};
use crate::gateway::ProviderError;
use crate::model::SessionId;
use crate::store::{SaveOutcome, SqliteStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Rows already stored for the session were returned; no external call.
    Hit,
    /// Nothing stored; the collaborator was called and its rows persisted.
    Miss,
    /// No session to read from or write to; the collaborator was called and
    /// nothing was persisted.
    Bypass,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheLookup<R> {
    pub kind: AgentKind,
    pub status: CacheStatus,
    pub rows: Vec<Stored<R>>,
}

impl<R> CacheLookup<R> {
    pub fn is_hit(&self) -> bool {
        self.status == CacheStatus::Hit
    }

    /// Row with the greatest `(created_at, id)`.
    pub fn latest(&self) -> Option<&R> {
        self.rows.last().map(|stored| &stored.row)
    }

    pub fn values(&self) -> impl Iterator<Item = &R> {
        self.rows.iter().map(|stored| &stored.row)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Clone)]
pub struct CachePolicy {
    store: SqliteStore,
}

impl CachePolicy {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Serve `T`'s rows for `session` from the store, or call `fetch` and
    /// persist what it returns.
    ///
    /// With no session the fetch always runs and nothing is written. An empty
    /// fetch writes nothing, so the next lookup for the session misses again.
    /// When a concurrent lookup persists first, its rows win, this fetch is
    /// discarded and the result is a hit.
    pub async fn fetch_or_load<T, F, Fut>(
        &self,
        session: Option<SessionId>,
        fetch: F,
    ) -> Result<CacheLookup<T::Row>, LookupError>
    where
        T: AgentTable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Fetched<T::Row>, ProviderError>>,
    {
        let Some(session_id) = session else {
            tracing::info!(agent = %T::KIND, "no session; calling agent without cache");
            let fetched = fetch().await?;
            return Ok(CacheLookup {
                kind: T::KIND,
                status: CacheStatus::Bypass,
                rows: detached(fetched),
            });
        };

        let cached = self.store.load::<T>(session_id).await?;
        if !cached.is_empty() {
            tracing::info!(
                agent = %T::KIND,
                session_id,
                rows = cached.len(),
                "using cached results"
            );
            return Ok(CacheLookup {
                kind: T::KIND,
                status: CacheStatus::Hit,
                rows: cached,
            });
        }

        tracing::info!(agent = %T::KIND, session_id, "no cached results; calling agent");
        let fetched = fetch().await?;
        if fetched.rows.is_empty() {
            tracing::warn!(agent = %T::KIND, session_id, "agent returned no rows; nothing cached");
            return Ok(CacheLookup {
                kind: T::KIND,
                status: CacheStatus::Miss,
                rows: Vec::new(),
            });
        }

        let (status, rows) = match self
            .store
            .save_if_empty::<T>(session_id, fetched.rows, fetched.raw)
            .await?
        {
            SaveOutcome::Inserted(rows) => {
                tracing::info!(
                    agent = %T::KIND,
                    session_id,
                    rows = rows.len(),
                    "cached agent results"
                );
                (CacheStatus::Miss, rows)
            }
            SaveOutcome::Existing(rows) => {
                tracing::warn!(
                    agent = %T::KIND,
                    session_id,
                    rows = rows.len(),
                    "results cached concurrently; discarding this fetch"
                );
                (CacheStatus::Hit, rows)
            }
        };
        Ok(CacheLookup {
            kind: T::KIND,
            status,
            rows,
        })
    }
}

/// Rows that were never persisted carry id 0 and session 0.
fn detached<R>(fetched: Fetched<R>) -> Vec<Stored<R>> {
    let created_at = chrono::Utc::now().timestamp();
    let raw = fetched.raw;
    fetched
        .rows
        .into_iter()
        .map(|row| Stored {
            id: 0,
            session_id: 0,
            created_at,
            row,
            raw: raw.clone(),
        })
        .collect()
}
