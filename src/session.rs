//! Per-run session resolution.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{NewSession, Session};
use crate::store::{SqliteStore, StoreError};

/// How a run picks its session.
///
/// `force_new` wins over `reuse_latest`. With neither set a new session is
/// created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    pub reuse_latest: bool,
    pub force_new: bool,
}

impl SessionPolicy {
    pub fn reuse_latest() -> Self {
        Self {
            reuse_latest: true,
            force_new: false,
        }
    }

    pub fn force_new() -> Self {
        Self {
            reuse_latest: false,
            force_new: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSession {
    pub session: Session,
    pub created: bool,
}

pub async fn resolve_session(
    store: &SqliteStore,
    policy: SessionPolicy,
    new: &NewSession,
) -> Result<ResolvedSession, StoreError> {
    if !policy.force_new && policy.reuse_latest {
        if let Some(session) = store.latest_session().await? {
            tracing::info!(session_id = session.id, name = %session.name, "reusing latest session");
            return Ok(ResolvedSession {
                session,
                created: false,
            });
        }
        tracing::info!("no existing session to reuse; creating one");
    }

    let session = store.create_session(new).await?;
    tracing::info!(session_id = session.id, name = %session.name, "created session");
    Ok(ResolvedSession {
        session,
        created: true,
    })
}

/// Display name for a new session: the supplied description, or one derived
/// from the local creation time.
pub fn session_name(description: Option<&str>, now: DateTime<Utc>) -> String {
    match description.map(str::trim).filter(|d| !d.is_empty()) {
        Some(desc) => desc.to_string(),
        None => format!(
            "Content Generation - {}",
            now.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
    }
}
