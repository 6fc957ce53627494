// Embedded SQLite thread store.
//
// One connection behind a mutex; blocking work runs on the tokio blocking
// pool. Version appends use an IMMEDIATE transaction so the max-index read
// and the insert happen under the database write lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use canvas_common::types::{
    Artifact, ArtifactDraft, ArtifactKind, ArtifactVersion, Message, MessageContent, Role, Thread,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{parse_timestamp, shallow_merge, timestamp, StoreError, StoreResult};
use crate::artifact::{self, ArtifactImport};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE threads (
    thread_id       TEXT PRIMARY KEY,
    metadata        TEXT NOT NULL DEFAULT '{}',
    current_version INTEGER NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX threads_updated_at_idx
    ON threads (updated_at DESC);

CREATE TABLE thread_messages (
    thread_id       TEXT NOT NULL REFERENCES threads (thread_id) ON DELETE CASCADE,
    message_index   INTEGER NOT NULL,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    extra           TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (thread_id, message_index)
);

CREATE TABLE artifact_versions (
    thread_id       TEXT NOT NULL REFERENCES threads (thread_id) ON DELETE CASCADE,
    version_index   INTEGER NOT NULL CHECK (version_index >= 1),
    kind            TEXT NOT NULL CHECK (kind IN ('text', 'code')),
    title           TEXT NULL,
    language        TEXT NULL,
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (thread_id, version_index)
);
"#;

const MIGRATION_V2_SQL: &str = r#"
CREATE TABLE store_items (
    namespace       TEXT NOT NULL,
    item_key        TEXT NOT NULL,
    value           TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (namespace, item_key)
);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL), (2, MIGRATION_V2_SQL)];

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create canvas db parent directory `{}`", parent.display())
            })?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("failed to open canvas db at `{}`", path.display()))?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            ",
        )
        .context("failed to configure sqlite pragmas for canvas db")?;
        conn.busy_timeout(Duration::from_secs(5)).context("failed to set sqlite busy timeout")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)), path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> anyhow::Result<i64> {
        let conn = self.conn.lock().map_err(|_| anyhow!("sqlite connection mutex poisoned"))?;
        current_schema_version(&conn)
    }

    /// Run `work` against the connection on the blocking pool.
    pub(super) async fn with_conn<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard =
                conn.lock().map_err(|_| anyhow!("sqlite connection mutex poisoned"))?;
            work(&mut guard)
        })
        .await
        .context("sqlite task panicked")?
    }

    pub(super) async fn insert_thread(&self, thread: Thread) -> StoreResult<Option<Thread>> {
        self.with_conn(move |conn| {
            let metadata = serde_json::to_string(&thread.metadata)
                .context("failed to encode thread metadata")?;
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO threads (thread_id, metadata, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        thread.id.to_string(),
                        metadata,
                        timestamp(thread.created_at),
                        timestamp(thread.updated_at)
                    ],
                )
                .context("failed to insert thread")?;
            Ok((inserted > 0).then_some(thread))
        })
        .await
    }

    pub(super) async fn get_thread(&self, thread_id: Uuid) -> StoreResult<Thread> {
        self.with_conn(move |conn| load_thread(conn, thread_id)).await
    }

    pub(super) async fn merge_metadata(
        &self,
        thread_id: Uuid,
        patch: Map<String, Value>,
    ) -> StoreResult<Thread> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("failed to start metadata transaction")?;
            let mut thread = load_thread(&tx, thread_id)?;
            shallow_merge(&mut thread.metadata, patch);
            thread.updated_at = Utc::now();
            let metadata = serde_json::to_string(&thread.metadata)
                .context("failed to encode thread metadata")?;
            tx.execute(
                "UPDATE threads SET metadata = ?2, updated_at = ?3 WHERE thread_id = ?1",
                params![thread_id.to_string(), metadata, timestamp(thread.updated_at)],
            )
            .context("failed to update thread metadata")?;
            tx.commit().context("failed to commit metadata update")?;
            Ok(thread)
        })
        .await
    }

    pub(super) async fn delete_thread(&self, thread_id: Uuid) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let deleted = conn
                .execute("DELETE FROM threads WHERE thread_id = ?1", params![thread_id.to_string()])
                .context("failed to delete thread")?;
            if deleted == 0 {
                return Err(StoreError::thread_not_found(thread_id));
            }
            Ok(())
        })
        .await
    }

    pub(super) async fn list_threads(&self) -> StoreResult<Vec<Thread>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT thread_id, metadata, created_at, updated_at FROM threads
                     ORDER BY updated_at DESC, thread_id ASC",
                )
                .context("failed to prepare thread listing")?;
            let rows = stmt
                .query_map([], thread_columns)
                .context("failed to list threads")?
                .collect::<Result<Vec<_>, _>>()
                .context("failed to read thread row")?;
            rows.into_iter().map(thread_from_columns).collect()
        })
        .await
    }

    pub(super) async fn get_messages(&self, thread_id: Uuid) -> StoreResult<Vec<Message>> {
        self.with_conn(move |conn| {
            load_thread(conn, thread_id)?;
            let mut stmt = conn
                .prepare(
                    "SELECT message_index, role, content, extra FROM thread_messages
                     WHERE thread_id = ?1 ORDER BY message_index ASC",
                )
                .context("failed to prepare message query")?;
            let rows = stmt
                .query_map(params![thread_id.to_string()], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .context("failed to query messages")?
                .collect::<Result<Vec<_>, _>>()
                .context("failed to read message row")?;

            rows.into_iter()
                .map(|(ordinal, role, content, extra)| -> StoreResult<Message> {
                    Ok(Message {
                        ordinal: usize::try_from(ordinal).context("negative message index")?,
                        role: Role::normalize(&role),
                        content: serde_json::from_str::<MessageContent>(&content)
                            .context("failed to decode message content")?,
                        extra: serde_json::from_str(&extra)
                            .context("failed to decode message extra")?,
                    })
                })
                .collect()
        })
        .await
    }

    pub(super) async fn replace_messages(
        &self,
        thread_id: Uuid,
        messages: Vec<Message>,
    ) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("failed to start message transaction")?;
            load_thread(&tx, thread_id)?;
            let id = thread_id.to_string();
            tx.execute("DELETE FROM thread_messages WHERE thread_id = ?1", params![id])
                .context("failed to clear messages")?;
            {
                let mut insert = tx
                    .prepare(
                        "INSERT INTO thread_messages (thread_id, message_index, role, content, extra)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .context("failed to prepare message insert")?;
                for message in &messages {
                    let content = serde_json::to_string(&message.content)
                        .context("failed to encode message content")?;
                    let extra = serde_json::to_string(&message.extra)
                        .context("failed to encode message extra")?;
                    insert
                        .execute(params![
                            id,
                            message.ordinal as i64,
                            message.role.as_str(),
                            content,
                            extra
                        ])
                        .context("failed to insert message")?;
                }
            }
            touch(&tx, thread_id)?;
            tx.commit().context("failed to commit message replace")?;
            Ok(())
        })
        .await
    }

    pub(super) async fn get_artifact(&self, thread_id: Uuid) -> StoreResult<Option<Artifact>> {
        self.with_conn(move |conn| {
            let current = load_current_version(conn, thread_id)?;
            let versions = load_versions(conn, thread_id)?;
            Ok(artifact::assemble(versions, current))
        })
        .await
    }

    pub(super) async fn append_version(
        &self,
        thread_id: Uuid,
        draft: ArtifactDraft,
    ) -> StoreResult<ArtifactVersion> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("failed to start append transaction")?;
            load_current_version(&tx, thread_id)?;
            let stored = load_versions(&tx, thread_id)?;
            let version = artifact::plan_append(&stored, draft);
            insert_version(&tx, thread_id, &version)?;
            set_current(&tx, thread_id, version.index)?;
            tx.commit().context("failed to commit version append")?;
            Ok(version)
        })
        .await
    }

    pub(super) async fn apply_import(
        &self,
        thread_id: Uuid,
        import: ArtifactImport,
    ) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("failed to start import transaction")?;
            load_current_version(&tx, thread_id)?;
            let stored = load_versions(&tx, thread_id)?;
            let plan = import.plan(&stored)?;
            for version in &plan.append {
                insert_version(&tx, thread_id, version)?;
            }
            match plan.current_index {
                Some(index) => set_current(&tx, thread_id, index)?,
                None => touch(&tx, thread_id)?,
            }
            tx.commit().context("failed to commit artifact import")?;
            Ok(())
        })
        .await
    }
}

// ── Row helpers ────────────────────────────────────────────────────

type ThreadColumns = (String, String, String, String);

fn thread_columns(row: &Row<'_>) -> rusqlite::Result<ThreadColumns> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn thread_from_columns(columns: ThreadColumns) -> StoreResult<Thread> {
    let (id, metadata, created_at, updated_at) = columns;
    Ok(Thread {
        id: Uuid::parse_str(&id).with_context(|| format!("invalid stored thread id `{id}`"))?,
        metadata: serde_json::from_str(&metadata).context("failed to decode thread metadata")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn load_thread(conn: &Connection, thread_id: Uuid) -> StoreResult<Thread> {
    let columns = conn
        .query_row(
            "SELECT thread_id, metadata, created_at, updated_at FROM threads WHERE thread_id = ?1",
            params![thread_id.to_string()],
            thread_columns,
        )
        .optional()
        .context("failed to load thread")?
        .ok_or_else(|| StoreError::thread_not_found(thread_id))?;
    thread_from_columns(columns)
}

/// Current pointer of an existing thread; not-found when the thread is absent.
fn load_current_version(conn: &Connection, thread_id: Uuid) -> StoreResult<Option<u32>> {
    let current: Option<Option<i64>> = conn
        .query_row(
            "SELECT current_version FROM threads WHERE thread_id = ?1",
            params![thread_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .context("failed to load current artifact version")?;
    match current {
        None => Err(StoreError::thread_not_found(thread_id)),
        Some(index) => Ok(index.and_then(|value| u32::try_from(value).ok())),
    }
}

fn load_versions(conn: &Connection, thread_id: Uuid) -> StoreResult<Vec<ArtifactVersion>> {
    let mut stmt = conn
        .prepare(
            "SELECT version_index, kind, title, language, content FROM artifact_versions
             WHERE thread_id = ?1 ORDER BY version_index ASC",
        )
        .context("failed to prepare version query")?;
    let rows = stmt
        .query_map(params![thread_id.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .context("failed to query versions")?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to read version row")?;

    rows.into_iter()
        .map(|(index, kind, title, language, content)| -> StoreResult<ArtifactVersion> {
            Ok(ArtifactVersion {
                index: u32::try_from(index).context("invalid stored version index")?,
                kind: ArtifactKind::parse(&kind)
                    .ok_or_else(|| anyhow!("invalid stored artifact kind `{kind}`"))?,
                title,
                language,
                content,
            })
        })
        .collect()
}

fn insert_version(conn: &Connection, thread_id: Uuid, version: &ArtifactVersion) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO artifact_versions
            (thread_id, version_index, kind, title, language, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            thread_id.to_string(),
            i64::from(version.index),
            version.kind.as_str(),
            version.title,
            version.language,
            version.content,
            timestamp(Utc::now())
        ],
    )
    .with_context(|| format!("failed to insert artifact version {}", version.index))?;
    Ok(())
}

fn set_current(conn: &Connection, thread_id: Uuid, index: u32) -> StoreResult<()> {
    conn.execute(
        "UPDATE threads SET current_version = ?2, updated_at = ?3 WHERE thread_id = ?1",
        params![thread_id.to_string(), i64::from(index), timestamp(Utc::now())],
    )
    .context("failed to move current artifact version")?;
    Ok(())
}

fn touch(conn: &Connection, thread_id: Uuid) -> StoreResult<()> {
    conn.execute(
        "UPDATE threads SET updated_at = ?2 WHERE thread_id = ?1",
        params![thread_id.to_string(), timestamp(Utc::now())],
    )
    .context("failed to touch thread")?;
    Ok(())
}

// ── Migrations ─────────────────────────────────────────────────────

fn ensure_migration_table(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> anyhow::Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply canvas db migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EXPECTED_TABLES: &[&str] =
        &["schema_migrations", "threads", "thread_messages", "artifact_versions", "store_items"];

    fn table_exists(store: &SqliteStore, table: &str) -> bool {
        let conn = store.conn.lock().expect("connection lock should not be poisoned");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .expect("table existence query should succeed");
        count == 1
    }

    #[test]
    fn open_creates_schema_and_records_latest_migration() {
        let dir = TempDir::new().expect("temp dir should be created");
        let store = SqliteStore::open(dir.path().join("canvas.db")).expect("store should open");

        for table in EXPECTED_TABLES {
            assert!(table_exists(&store, table), "expected `{table}` table to exist");
        }
        assert_eq!(store.schema_version().expect("schema version should be readable"), 2);
    }

    #[test]
    fn reopening_is_idempotent() {
        let dir = TempDir::new().expect("temp dir should be created");
        let path = dir.path().join("nested").join("canvas.db");
        {
            let first = SqliteStore::open(&path).expect("first open should succeed");
            assert_eq!(first.path(), path.as_path());
        }
        let second = SqliteStore::open(&path).expect("second open should succeed");
        assert_eq!(second.schema_version().expect("schema version should be readable"), 2);
    }

    #[test]
    fn v1_database_is_upgraded_with_store_items() {
        let dir = TempDir::new().expect("temp dir should be created");
        let path = dir.path().join("canvas.db");
        {
            let conn = Connection::open(&path).expect("seed connection should open");
            ensure_migration_table(&conn).expect("migration table should be created");
            conn.execute_batch(MIGRATION_V1_SQL).expect("v1 schema should apply");
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (1, datetime('now'))",
                [],
            )
            .expect("v1 should be recorded");
        }

        let store = SqliteStore::open(&path).expect("store should upgrade");
        assert_eq!(store.schema_version().expect("schema version should be readable"), 2);
        assert!(table_exists(&store, "store_items"));
    }

    #[tokio::test]
    async fn deleting_a_thread_cascades_rows() {
        let dir = TempDir::new().expect("temp dir should be created");
        let store = SqliteStore::open(dir.path().join("canvas.db")).expect("store should open");
        let thread = store
            .insert_thread(Thread::new(Map::new()))
            .await
            .expect("insert")
            .expect("fresh id should insert");
        store
            .replace_messages(thread.id, vec![Message::user("hello")])
            .await
            .expect("messages should be stored");
        store
            .append_version(thread.id, ArtifactDraft::text(None, "A"))
            .await
            .expect("version should append");

        store.delete_thread(thread.id).await.expect("delete should succeed");

        let conn = store.conn.lock().expect("connection lock should not be poisoned");
        for table in ["thread_messages", "artifact_versions"] {
            let remaining: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .expect("count should succeed");
            assert_eq!(remaining, 0, "{table} should be empty after cascade");
        }
    }
}
