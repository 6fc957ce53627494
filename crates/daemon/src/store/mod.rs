// Thread, message and artifact persistence.
//
// One interface, three interchangeable backends: in-memory, embedded SQLite
// file and hosted PostgreSQL. The backend is chosen explicitly by
// `open_stores` from config; nothing here reads global state.

pub mod kv;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use anyhow::Context;
use canvas_common::protocol::threads::{ThreadState, UpdateStateRequest};
use canvas_common::types::{
    Artifact, ArtifactDraft, ArtifactVersion, ArtifactVersionMeta, Message, Thread,
};
use serde_json::{Map, Value};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::artifact::ArtifactImport;
use crate::config::{StorageBackend, StorageConfig};
pub use kv::KvStore;
use memory::MemoryState;
use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    pub fn thread_not_found(thread_id: Uuid) -> Self {
        Self::not_found("thread", thread_id)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ── Thread store ───────────────────────────────────────────────────

#[derive(Clone)]
pub enum ThreadStore {
    Memory(Arc<RwLock<MemoryState>>),
    Sqlite(SqliteStore),
    Postgres(PgPool),
}

impl ThreadStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::default())
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }

    pub async fn create_thread(&self, metadata: Map<String, Value>) -> StoreResult<Thread> {
        let thread = Thread::new(metadata);
        let id = thread.id;
        self.insert_thread(thread)
            .await?
            .ok_or_else(|| StoreError::Validation(format!("thread {id} already exists")))
    }

    /// Fetch a thread, creating it with the given id when absent. Racing
    /// callers on one id all get the same thread.
    pub async fn get_or_create_thread(&self, thread_id: Uuid) -> StoreResult<Thread> {
        match self.get_thread(thread_id).await {
            Ok(thread) => Ok(thread),
            Err(StoreError::NotFound { .. }) => {
                let mut thread = Thread::new(Map::new());
                thread.id = thread_id;
                match self.insert_thread(thread).await? {
                    Some(thread) => Ok(thread),
                    None => self.get_thread(thread_id).await,
                }
            }
            Err(error) => Err(error),
        }
    }

    /// Insert-or-ignore: `None` when the id is already taken.
    async fn insert_thread(&self, thread: Thread) -> StoreResult<Option<Thread>> {
        match self {
            Self::Memory(state) => memory::insert_thread(state, thread).await,
            Self::Sqlite(store) => store.insert_thread(thread).await,
            Self::Postgres(pool) => postgres::insert_thread(pool, thread).await,
        }
    }

    pub async fn get_thread(&self, thread_id: Uuid) -> StoreResult<Thread> {
        match self {
            Self::Memory(state) => memory::get_thread(state, thread_id).await,
            Self::Sqlite(store) => store.get_thread(thread_id).await,
            Self::Postgres(pool) => postgres::get_thread(pool, thread_id).await,
        }
    }

    /// Shallow-merge `patch` into the thread metadata.
    pub async fn merge_metadata(
        &self,
        thread_id: Uuid,
        patch: Map<String, Value>,
    ) -> StoreResult<Thread> {
        match self {
            Self::Memory(state) => memory::merge_metadata(state, thread_id, patch).await,
            Self::Sqlite(store) => store.merge_metadata(thread_id, patch).await,
            Self::Postgres(pool) => postgres::merge_metadata(pool, thread_id, patch).await,
        }
    }

    /// Delete a thread with its messages and artifact versions.
    pub async fn delete_thread(&self, thread_id: Uuid) -> StoreResult<()> {
        match self {
            Self::Memory(state) => memory::delete_thread(state, thread_id).await,
            Self::Sqlite(store) => store.delete_thread(thread_id).await,
            Self::Postgres(pool) => postgres::delete_thread(pool, thread_id).await,
        }
    }

    /// All threads, most recently updated first.
    async fn list_threads(&self) -> StoreResult<Vec<Thread>> {
        match self {
            Self::Memory(state) => memory::list_threads(state).await,
            Self::Sqlite(store) => store.list_threads().await,
            Self::Postgres(pool) => postgres::list_threads(pool).await,
        }
    }

    pub async fn get_messages(&self, thread_id: Uuid) -> StoreResult<Vec<Message>> {
        match self {
            Self::Memory(state) => memory::get_messages(state, thread_id).await,
            Self::Sqlite(store) => store.get_messages(thread_id).await,
            Self::Postgres(pool) => postgres::get_messages(pool, thread_id).await,
        }
    }

    /// Replace the whole message log in one atomic write. Ordinals are
    /// reassigned from each message's position in `messages`.
    pub async fn replace_messages(
        &self,
        thread_id: Uuid,
        messages: Vec<Message>,
    ) -> StoreResult<()> {
        let messages = renumber(messages);
        match self {
            Self::Memory(state) => memory::replace_messages(state, thread_id, messages).await,
            Self::Sqlite(store) => store.replace_messages(thread_id, messages).await,
            Self::Postgres(pool) => postgres::replace_messages(pool, thread_id, messages).await,
        }
    }

    pub async fn get_artifact(&self, thread_id: Uuid) -> StoreResult<Option<Artifact>> {
        match self {
            Self::Memory(state) => memory::get_artifact(state, thread_id).await,
            Self::Sqlite(store) => store.get_artifact(thread_id).await,
            Self::Postgres(pool) => postgres::get_artifact(pool, thread_id).await,
        }
    }

    /// Append a version at `max + 1` and make it current. Concurrent calls
    /// on one thread never receive the same index.
    pub async fn append_version(
        &self,
        thread_id: Uuid,
        draft: ArtifactDraft,
    ) -> StoreResult<ArtifactVersion> {
        match self {
            Self::Memory(state) => memory::append_version(state, thread_id, draft).await,
            Self::Sqlite(store) => store.append_version(thread_id, draft).await,
            Self::Postgres(pool) => postgres::append_version(pool, thread_id, draft).await,
        }
    }

    /// Reconcile a full artifact snapshot against stored versions: stored
    /// versions must match exactly, new ones are appended.
    pub async fn import_artifact(&self, thread_id: Uuid, artifact: Artifact) -> StoreResult<()> {
        self.apply_import(thread_id, ArtifactImport::from_artifact(artifact)).await
    }

    /// Move the current pointer to an existing version.
    pub async fn set_current_version(&self, thread_id: Uuid, index: u32) -> StoreResult<()> {
        self.apply_import(thread_id, ArtifactImport::select_only(index)).await
    }

    async fn apply_import(&self, thread_id: Uuid, import: ArtifactImport) -> StoreResult<()> {
        match self {
            Self::Memory(state) => memory::apply_import(state, thread_id, import).await,
            Self::Sqlite(store) => store.apply_import(thread_id, import).await,
            Self::Postgres(pool) => postgres::apply_import(pool, thread_id, import).await,
        }
    }

    // ── Composite views ────────────────────────────────────────────

    /// The requested version, or the latest one when `index` is `None`.
    pub async fn artifact_version(
        &self,
        thread_id: Uuid,
        index: Option<u32>,
    ) -> StoreResult<ArtifactVersion> {
        let artifact = self.require_artifact(thread_id).await?;
        let wanted = index.unwrap_or_else(|| artifact.max_index());
        artifact
            .version(wanted)
            .cloned()
            .ok_or_else(|| StoreError::not_found("artifact version", wanted))
    }

    /// The artifact as it stood at version `index` (latest when `None`):
    /// versions up to and including `index`, with that version current.
    pub async fn artifact_at(&self, thread_id: Uuid, index: Option<u32>) -> StoreResult<Artifact> {
        let mut artifact = self.require_artifact(thread_id).await?;
        let wanted = index.unwrap_or_else(|| artifact.max_index());
        if artifact.version(wanted).is_none() {
            return Err(StoreError::not_found("artifact version", wanted));
        }
        artifact.versions.retain(|version| version.index <= wanted);
        artifact.current_index = wanted;
        Ok(artifact)
    }

    pub async fn artifact_metadata(&self, thread_id: Uuid) -> StoreResult<ArtifactVersionMeta> {
        Ok(self.require_artifact(thread_id).await?.metadata())
    }

    async fn require_artifact(&self, thread_id: Uuid) -> StoreResult<Artifact> {
        self.get_thread(thread_id).await?;
        self.get_artifact(thread_id)
            .await?
            .ok_or_else(|| StoreError::not_found("artifact", thread_id))
    }

    pub async fn thread_state(&self, thread_id: Uuid) -> StoreResult<ThreadState> {
        let thread = self.get_thread(thread_id).await?;
        let messages = self.get_messages(thread_id).await?;
        let artifact = self.get_artifact(thread_id).await?;
        Ok(ThreadState::new(thread, messages, artifact))
    }

    /// Threads matching every `filter` entry, newest first, at most `limit`.
    /// Each entry carries only its first message.
    pub async fn search_threads(
        &self,
        limit: usize,
        filter: &Map<String, Value>,
    ) -> StoreResult<Vec<ThreadState>> {
        let threads = self.list_threads().await?;
        let mut results = Vec::new();
        for thread in threads.into_iter().filter(|t| metadata_matches(&t.metadata, filter)) {
            if results.len() >= limit {
                break;
            }
            let first = self.get_messages(thread.id).await?.into_iter().take(1).collect();
            results.push(ThreadState::new(thread, first, None));
        }
        Ok(results)
    }

    /// Apply a partial update. Each field follows its own rule:
    /// metadata shallow-merges, messages replace wholesale, artifact
    /// versions are reconciled append-only.
    pub async fn update_state(
        &self,
        thread_id: Uuid,
        request: UpdateStateRequest,
    ) -> StoreResult<ThreadState> {
        self.get_thread(thread_id).await?;

        if let Some(values) = request.values {
            if let Some(key) = values.unknown.keys().next() {
                return Err(StoreError::Validation(format!(
                    "thread values do not accept key `{key}`"
                )));
            }
            if let Some(artifact) = values.artifact {
                self.import_artifact(thread_id, artifact.into()).await?;
            }
            if let Some(messages) = values.messages {
                self.replace_messages(thread_id, messages).await?;
            }
        }
        if let Some(metadata) = request.metadata {
            self.merge_metadata(thread_id, metadata).await?;
        }

        self.thread_state(thread_id).await
    }
}

// ── Factory ────────────────────────────────────────────────────────

/// The thread store and key-value store for one backend.
#[derive(Clone)]
pub struct Stores {
    pub threads: ThreadStore,
    pub kv: KvStore,
}

impl Stores {
    pub fn memory() -> Self {
        Self { threads: ThreadStore::memory(), kv: KvStore::memory() }
    }
}

pub async fn open_stores(config: &StorageConfig) -> anyhow::Result<Stores> {
    let stores = match config.backend {
        StorageBackend::Memory => Stores::memory(),
        StorageBackend::Sqlite => {
            let path = config
                .resolved_sqlite_path()
                .context("could not determine sqlite path; set storage.sqlite_path")?;
            let store = SqliteStore::open(&path)?;
            Stores { threads: ThreadStore::Sqlite(store.clone()), kv: KvStore::Sqlite(store) }
        }
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("storage.database_url must be set for the postgres backend")?;
            let pool = pool::create_pg_pool(database_url, pool::PoolConfig::from_storage(config))
                .await?;
            pool::check_pool_health(&pool).await?;
            postgres::migrate(&pool).await?;
            Stores { threads: ThreadStore::Postgres(pool.clone()), kv: KvStore::Postgres(pool) }
        }
    };
    info!(backend = stores.threads.backend_name(), "opened thread store");
    Ok(stores)
}

// ── Shared helpers ─────────────────────────────────────────────────

/// Strict filter: every filter key must be present with an equal value.
pub fn metadata_matches(metadata: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(key, expected)| metadata.get(key) == Some(expected))
}

pub fn shallow_merge(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        target.insert(key, value);
    }
}

fn renumber(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .enumerate()
        .map(|(ordinal, mut message)| {
            message.ordinal = ordinal;
            message
        })
        .collect()
}

pub(crate) fn timestamp(value: chrono::DateTime<chrono::Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&chrono::Utc))
        .with_context(|| format!("invalid stored timestamp `{raw}`"))
}
