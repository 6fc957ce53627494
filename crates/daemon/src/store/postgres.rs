// Hosted PostgreSQL thread store.
//
// Writes that depend on the current artifact state lock the thread row with
// `SELECT ... FOR UPDATE` inside a transaction; the
// `(thread_id, version_index)` primary key backs that up.

use anyhow::Context;
use canvas_common::types::{
    Artifact, ArtifactDraft, ArtifactKind, ArtifactVersion, Message, MessageContent, Role, Thread,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use super::{StoreError, StoreResult};
use crate::artifact::{self, ArtifactImport};

const MIGRATION_LOCK_KEY: i64 = 0x6361_6e76_6173;

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE threads (
    thread_id       UUID PRIMARY KEY,
    metadata        JSONB NOT NULL DEFAULT '{}'::jsonb,
    current_version INTEGER NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
);

CREATE INDEX threads_updated_at_idx
    ON threads (updated_at DESC);

CREATE TABLE thread_messages (
    thread_id       UUID NOT NULL REFERENCES threads (thread_id) ON DELETE CASCADE,
    message_index   INTEGER NOT NULL,
    role            TEXT NOT NULL,
    content         JSONB NOT NULL,
    extra           JSONB NOT NULL DEFAULT '{}'::jsonb,
    PRIMARY KEY (thread_id, message_index)
);

CREATE TABLE artifact_versions (
    thread_id       UUID NOT NULL REFERENCES threads (thread_id) ON DELETE CASCADE,
    version_index   INTEGER NOT NULL CHECK (version_index >= 1),
    kind            TEXT NOT NULL CHECK (kind IN ('text', 'code')),
    title           TEXT NULL,
    language        TEXT NULL,
    content         TEXT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (thread_id, version_index)
);
"#;

const MIGRATION_V2_SQL: &str = r#"
CREATE TABLE store_items (
    namespace       TEXT NOT NULL,
    item_key        TEXT NOT NULL,
    value           JSONB NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (namespace, item_key)
);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL), (2, MIGRATION_V2_SQL)];

/// Apply pending schema migrations. Concurrent callers serialize on an
/// advisory lock.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    let mut tx = pool.begin().await.context("failed to start migration transaction")?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .context("failed to take migration lock")?;
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS canvas_schema_migrations (
            version     BIGINT PRIMARY KEY,
            applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(&mut *tx)
    .await
    .context("failed to ensure canvas_schema_migrations table exists")?;

    let current: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM canvas_schema_migrations")
            .fetch_one(&mut *tx)
            .await
            .context("failed to read current schema version")?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        sqlx::raw_sql(*sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to apply canvas migration v{version}"))?;
        sqlx::query("INSERT INTO canvas_schema_migrations (version) VALUES ($1)")
            .bind(*version)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to record migration v{version}"))?;
        info!(version = *version, "applied canvas PostgreSQL migration");
    }

    tx.commit().await.context("failed to commit migrations")?;
    Ok(())
}

// ── Rows ───────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ThreadRow {
    thread_id: Uuid,
    metadata: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ThreadRow> for Thread {
    fn from(row: ThreadRow) -> Self {
        Thread {
            id: row.thread_id,
            metadata: row.metadata.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    message_index: i32,
    role: String,
    content: Json<MessageContent>,
    extra: Json<Map<String, Value>>,
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    version_index: i32,
    kind: String,
    title: Option<String>,
    language: Option<String>,
    content: String,
}

impl TryFrom<VersionRow> for ArtifactVersion {
    type Error = StoreError;

    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        Ok(ArtifactVersion {
            index: u32::try_from(row.version_index).context("invalid stored version index")?,
            kind: ArtifactKind::parse(&row.kind)
                .with_context(|| format!("invalid stored artifact kind `{}`", row.kind))?,
            title: row.title,
            language: row.language,
            content: row.content,
        })
    }
}

const THREAD_COLUMNS: &str = "thread_id, metadata, created_at, updated_at";

// ── Threads ────────────────────────────────────────────────────────

pub(super) async fn insert_thread(pool: &PgPool, thread: Thread) -> StoreResult<Option<Thread>> {
    let row = sqlx::query_as::<_, ThreadRow>(&format!(
        "INSERT INTO threads (thread_id, metadata, created_at, updated_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (thread_id) DO NOTHING
         RETURNING {THREAD_COLUMNS}"
    ))
    .bind(thread.id)
    .bind(Json(&thread.metadata))
    .bind(thread.created_at)
    .bind(thread.updated_at)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.map(Thread::from))
}

pub(super) async fn get_thread(pool: &PgPool, thread_id: Uuid) -> StoreResult<Thread> {
    sqlx::query_as::<_, ThreadRow>(&format!(
        "SELECT {THREAD_COLUMNS} FROM threads WHERE thread_id = $1"
    ))
    .bind(thread_id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?
    .map(Thread::from)
    .ok_or_else(|| StoreError::thread_not_found(thread_id))
}

pub(super) async fn merge_metadata(
    pool: &PgPool,
    thread_id: Uuid,
    patch: Map<String, Value>,
) -> StoreResult<Thread> {
    // jsonb `||` on two objects replaces top-level keys only.
    sqlx::query_as::<_, ThreadRow>(&format!(
        "UPDATE threads SET metadata = metadata || $2, updated_at = $3
         WHERE thread_id = $1
         RETURNING {THREAD_COLUMNS}"
    ))
    .bind(thread_id)
    .bind(Json(&patch))
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?
    .map(Thread::from)
    .ok_or_else(|| StoreError::thread_not_found(thread_id))
}

pub(super) async fn delete_thread(pool: &PgPool, thread_id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM threads WHERE thread_id = $1")
        .bind(thread_id)
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(StoreError::thread_not_found(thread_id));
    }
    Ok(())
}

pub(super) async fn list_threads(pool: &PgPool) -> StoreResult<Vec<Thread>> {
    let rows = sqlx::query_as::<_, ThreadRow>(&format!(
        "SELECT {THREAD_COLUMNS} FROM threads ORDER BY updated_at DESC, thread_id ASC"
    ))
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;
    Ok(rows.into_iter().map(Thread::from).collect())
}

// ── Messages ───────────────────────────────────────────────────────

pub(super) async fn get_messages(pool: &PgPool, thread_id: Uuid) -> StoreResult<Vec<Message>> {
    get_thread(pool, thread_id).await?;
    let rows = sqlx::query_as::<_, MessageRow>(
        "SELECT message_index, role, content, extra FROM thread_messages
         WHERE thread_id = $1 ORDER BY message_index ASC",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    rows.into_iter()
        .map(|row| -> StoreResult<Message> {
            Ok(Message {
                ordinal: usize::try_from(row.message_index).context("negative message index")?,
                role: Role::normalize(&row.role),
                content: row.content.0,
                extra: row.extra.0,
            })
        })
        .collect()
}

pub(super) async fn replace_messages(
    pool: &PgPool,
    thread_id: Uuid,
    messages: Vec<Message>,
) -> StoreResult<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;
    lock_thread(&mut tx, thread_id).await?;

    sqlx::query("DELETE FROM thread_messages WHERE thread_id = $1")
        .bind(thread_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

    for message in &messages {
        let ordinal = i32::try_from(message.ordinal).context("message log too long")?;
        sqlx::query(
            "INSERT INTO thread_messages (thread_id, message_index, role, content, extra)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(thread_id)
        .bind(ordinal)
        .bind(message.role.as_str())
        .bind(Json(&message.content))
        .bind(Json(&message.extra))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
    }

    sqlx::query("UPDATE threads SET updated_at = $2 WHERE thread_id = $1")
        .bind(thread_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(())
}

// ── Artifact versions ──────────────────────────────────────────────

pub(super) async fn get_artifact(pool: &PgPool, thread_id: Uuid) -> StoreResult<Option<Artifact>> {
    let current: Option<Option<i32>> =
        sqlx::query_scalar("SELECT current_version FROM threads WHERE thread_id = $1")
            .bind(thread_id)
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?;
    let current = current.ok_or_else(|| StoreError::thread_not_found(thread_id))?;

    let rows = sqlx::query_as::<_, VersionRow>(
        "SELECT version_index, kind, title, language, content FROM artifact_versions
         WHERE thread_id = $1 ORDER BY version_index ASC",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    let versions =
        rows.into_iter().map(ArtifactVersion::try_from).collect::<StoreResult<Vec<_>>>()?;
    Ok(artifact::assemble(versions, current.and_then(|index| u32::try_from(index).ok())))
}

pub(super) async fn append_version(
    pool: &PgPool,
    thread_id: Uuid,
    draft: ArtifactDraft,
) -> StoreResult<ArtifactVersion> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;
    lock_thread(&mut tx, thread_id).await?;
    let stored = load_versions(&mut tx, thread_id).await?;
    let version = artifact::plan_append(&stored, draft);
    insert_version(&mut tx, thread_id, &version).await?;
    set_current(&mut tx, thread_id, version.index).await?;
    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(version)
}

pub(super) async fn apply_import(
    pool: &PgPool,
    thread_id: Uuid,
    import: ArtifactImport,
) -> StoreResult<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;
    lock_thread(&mut tx, thread_id).await?;
    let stored = load_versions(&mut tx, thread_id).await?;
    let plan = import.plan(&stored)?;
    for version in &plan.append {
        insert_version(&mut tx, thread_id, version).await?;
    }
    if let Some(index) = plan.current_index {
        set_current(&mut tx, thread_id, index).await?;
    }
    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(())
}

async fn lock_thread(tx: &mut Transaction<'_, Postgres>, thread_id: Uuid) -> StoreResult<()> {
    sqlx::query_scalar::<_, Uuid>("SELECT thread_id FROM threads WHERE thread_id = $1 FOR UPDATE")
        .bind(thread_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?
        .map(|_| ())
        .ok_or_else(|| StoreError::thread_not_found(thread_id))
}

async fn load_versions(
    tx: &mut Transaction<'_, Postgres>,
    thread_id: Uuid,
) -> StoreResult<Vec<ArtifactVersion>> {
    sqlx::query_as::<_, VersionRow>(
        "SELECT version_index, kind, title, language, content FROM artifact_versions
         WHERE thread_id = $1 ORDER BY version_index ASC",
    )
    .bind(thread_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(map_sqlx_error)?
    .into_iter()
    .map(ArtifactVersion::try_from)
    .collect()
}

async fn insert_version(
    tx: &mut Transaction<'_, Postgres>,
    thread_id: Uuid,
    version: &ArtifactVersion,
) -> StoreResult<()> {
    let index = i32::try_from(version.index).context("artifact version index overflow")?;
    sqlx::query(
        "INSERT INTO artifact_versions (thread_id, version_index, kind, title, language, content)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(thread_id)
    .bind(index)
    .bind(version.kind.as_str())
    .bind(version.title.as_deref())
    .bind(version.language.as_deref())
    .bind(&version.content)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

async fn set_current(
    tx: &mut Transaction<'_, Postgres>,
    thread_id: Uuid,
    index: u32,
) -> StoreResult<()> {
    let index = i32::try_from(index).context("artifact version index overflow")?;
    sqlx::query("UPDATE threads SET current_version = $2, updated_at = $3 WHERE thread_id = $1")
        .bind(thread_id)
        .bind(index)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

pub(super) fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(database_error) = &error {
        if database_error.code().as_deref() == Some("23505") {
            return StoreError::Validation("conflicting write to an immutable row".into());
        }
    }

    StoreError::Backend(error.into())
}
