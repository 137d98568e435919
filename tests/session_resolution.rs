use rusqlite::{params, Connection};
use signalpost::model::NewSession;
use signalpost::{resolve_session, SessionPolicy, SqliteStore};
use tempfile::tempdir;

fn new_session(description: Option<&str>) -> NewSession {
    NewSession {
        description: description.map(str::to_string),
        topic: "focus apps".to_string(),
        app_name: "Tuon.io".to_string(),
        app_description: "AI notes".to_string(),
    }
}

/// Insert sessions 1..=n directly, all sharing one timestamp so only the id
/// can order them.
fn seed_sessions(path: &std::path::Path, n: i64, created_at: i64) {
    let conn = Connection::open(path).unwrap();
    for i in 1..=n {
        conn.execute(
            "INSERT INTO sessions (id, session_name, created_at) VALUES (?1, ?2, ?3)",
            params![i, format!("seeded {i}"), created_at],
        )
        .unwrap();
    }
}

#[tokio::test]
async fn reuse_picks_latest_session_by_time_then_id() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.sqlite");
    let store = SqliteStore::new(&path).unwrap();
    seed_sessions(&path, 7, 1_700_000_000);

    let resolved = resolve_session(&store, SessionPolicy::reuse_latest(), &new_session(None))
        .await
        .unwrap();
    assert!(!resolved.created);
    assert_eq!(resolved.session.id, 7);
    assert_eq!(resolved.session.name, "seeded 7");
    assert_eq!(store.list_sessions().await.unwrap().len(), 7);
}

#[tokio::test]
async fn newer_timestamp_beats_higher_id() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.sqlite");
    let store = SqliteStore::new(&path).unwrap();
    seed_sessions(&path, 3, 1_700_000_000);
    Connection::open(&path)
        .unwrap()
        .execute("UPDATE sessions SET created_at = 1800000000 WHERE id = 2", [])
        .unwrap();

    let latest = store.latest_session().await.unwrap().unwrap();
    assert_eq!(latest.id, 2);
}

#[tokio::test]
async fn force_new_wins_over_reuse() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.sqlite");
    let store = SqliteStore::new(&path).unwrap();
    seed_sessions(&path, 2, 1_700_000_000);

    let policy = SessionPolicy {
        reuse_latest: true,
        force_new: true,
    };
    let resolved = resolve_session(&store, policy, &new_session(Some("fresh")))
        .await
        .unwrap();
    assert!(resolved.created);
    assert_eq!(resolved.session.id, 3);
    assert_eq!(resolved.session.name, "fresh");
    assert_eq!(resolved.session.topic, "focus apps");
}

#[tokio::test]
async fn reuse_on_empty_store_creates_session() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("store.sqlite")).unwrap();

    let resolved = resolve_session(&store, SessionPolicy::reuse_latest(), &new_session(None))
        .await
        .unwrap();
    assert!(resolved.created);
    assert!(resolved.session.name.starts_with("Content Generation - "));

    let again = resolve_session(&store, SessionPolicy::reuse_latest(), &new_session(None))
        .await
        .unwrap();
    assert!(!again.created);
    assert_eq!(again.session, resolved.session);
}

#[tokio::test]
async fn no_flags_always_creates() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("store.sqlite")).unwrap();

    let first = resolve_session(&store, SessionPolicy::default(), &new_session(None))
        .await
        .unwrap();
    let second = resolve_session(&store, SessionPolicy::default(), &new_session(None))
        .await
        .unwrap();
    assert!(first.created && second.created);
    assert_ne!(first.session.id, second.session.id);
}

#[tokio::test]
async fn sessions_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.sqlite");
    let created = {
        let store = SqliteStore::new(&path).unwrap();
        store.create_session(&new_session(Some("keep"))).await.unwrap()
    };

    let reopened = SqliteStore::new(&path).unwrap();
    assert_eq!(reopened.get_session(created.id).await.unwrap(), created);
}
