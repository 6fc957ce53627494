// Namespaced key-value store for reflections and custom-action definitions.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use canvas_common::protocol::store::{is_valid_segment, join_namespace, StoreItem};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::sync::RwLock;

use super::postgres::map_sqlx_error;
use super::sqlite::SqliteStore;
use super::{parse_timestamp, timestamp, StoreError, StoreResult};

type ItemMap = HashMap<(String, String), (Value, DateTime<Utc>)>;

/// Flatten `namespace` into its storage key, rejecting segments that would
/// collide with another namespace once joined.
fn storage_namespace(namespace: &[String]) -> StoreResult<String> {
    match namespace.iter().find(|segment| !is_valid_segment(segment)) {
        Some(segment) => Err(StoreError::Validation(format!(
            "namespace segment `{segment}` must be non-empty and must not contain `/`"
        ))),
        None => Ok(join_namespace(namespace)),
    }
}

#[derive(Clone)]
pub enum KvStore {
    Memory(Arc<RwLock<ItemMap>>),
    Sqlite(SqliteStore),
    Postgres(PgPool),
}

impl KvStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::default())
    }

    pub async fn get_item(&self, namespace: &[String], key: &str) -> StoreResult<Option<StoreItem>> {
        let joined = storage_namespace(namespace)?;
        let found = match self {
            Self::Memory(items) => {
                items.read().await.get(&(joined, key.to_owned())).cloned()
            }
            Self::Sqlite(store) => get_sqlite(store, joined, key.to_owned()).await?,
            Self::Postgres(pool) => get_pg(pool, &joined, key).await?,
        };
        Ok(found.map(|(value, updated_at)| StoreItem {
            namespace: namespace.to_vec(),
            key: key.to_owned(),
            value,
            updated_at,
        }))
    }

    /// Insert or overwrite an item.
    pub async fn put_item(
        &self,
        namespace: &[String],
        key: &str,
        value: Value,
    ) -> StoreResult<StoreItem> {
        if key.is_empty() {
            return Err(StoreError::Validation("store item key must not be empty".into()));
        }
        let joined = storage_namespace(namespace)?;
        let updated_at = Utc::now();
        match self {
            Self::Memory(items) => {
                items
                    .write()
                    .await
                    .insert((joined, key.to_owned()), (value.clone(), updated_at));
            }
            Self::Sqlite(store) => {
                put_sqlite(store, joined, key.to_owned(), value.clone(), updated_at).await?
            }
            Self::Postgres(pool) => put_pg(pool, &joined, key, &value, updated_at).await?,
        }
        Ok(StoreItem { namespace: namespace.to_vec(), key: key.to_owned(), value, updated_at })
    }

    /// Remove an item; not-found when it was absent.
    pub async fn delete_item(&self, namespace: &[String], key: &str) -> StoreResult<()> {
        let joined = storage_namespace(namespace)?;
        let removed = match self {
            Self::Memory(items) => {
                items.write().await.remove(&(joined.clone(), key.to_owned())).is_some()
            }
            Self::Sqlite(store) => delete_sqlite(store, joined.clone(), key.to_owned()).await?,
            Self::Postgres(pool) => delete_pg(pool, &joined, key).await?,
        };
        if !removed {
            return Err(StoreError::not_found("store item", format!("{joined}:{key}")));
        }
        Ok(())
    }

    /// Fetch and decode an item's value.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        namespace: &[String],
        key: &str,
    ) -> StoreResult<Option<T>> {
        match self.get_item(namespace, key).await? {
            None => Ok(None),
            Some(item) => serde_json::from_value(item.value)
                .map(Some)
                .with_context(|| format!("store item `{key}` has an unexpected shape"))
                .map_err(StoreError::from),
        }
    }
}

// ── SQLite ─────────────────────────────────────────────────────────

async fn get_sqlite(
    store: &SqliteStore,
    namespace: String,
    key: String,
) -> StoreResult<Option<(Value, DateTime<Utc>)>> {
    store
        .with_conn(move |conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT value, updated_at FROM store_items
                     WHERE namespace = ?1 AND item_key = ?2",
                    params![namespace, key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .context("failed to read store item")?;
            match row {
                None => Ok(None),
                Some((value, updated_at)) => Ok(Some((
                    serde_json::from_str(&value).context("failed to decode store item")?,
                    parse_timestamp(&updated_at)?,
                ))),
            }
        })
        .await
}

async fn put_sqlite(
    store: &SqliteStore,
    namespace: String,
    key: String,
    value: Value,
    updated_at: DateTime<Utc>,
) -> StoreResult<()> {
    store
        .with_conn(move |conn| {
            let encoded = serde_json::to_string(&value).context("failed to encode store item")?;
            conn.execute(
                "INSERT INTO store_items (namespace, item_key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (namespace, item_key)
                 DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![namespace, key, encoded, timestamp(updated_at)],
            )
            .context("failed to write store item")?;
            Ok(())
        })
        .await
}

async fn delete_sqlite(store: &SqliteStore, namespace: String, key: String) -> StoreResult<bool> {
    store
        .with_conn(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM store_items WHERE namespace = ?1 AND item_key = ?2",
                    params![namespace, key],
                )
                .context("failed to delete store item")?;
            Ok(deleted > 0)
        })
        .await
}

// ── PostgreSQL ─────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ItemRow {
    value: Json<Value>,
    updated_at: DateTime<Utc>,
}

async fn get_pg(
    pool: &PgPool,
    namespace: &str,
    key: &str,
) -> StoreResult<Option<(Value, DateTime<Utc>)>> {
    let row = sqlx::query_as::<_, ItemRow>(
        "SELECT value, updated_at FROM store_items WHERE namespace = $1 AND item_key = $2",
    )
    .bind(namespace)
    .bind(key)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?;
    Ok(row.map(|row| (row.value.0, row.updated_at)))
}

async fn put_pg(
    pool: &PgPool,
    namespace: &str,
    key: &str,
    value: &Value,
    updated_at: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO store_items (namespace, item_key, value, updated_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (namespace, item_key)
         DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at",
    )
    .bind(namespace)
    .bind(key)
    .bind(Json(value))
    .bind(updated_at)
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

async fn delete_pg(pool: &PgPool, namespace: &str, key: &str) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM store_items WHERE namespace = $1 AND item_key = $2")
        .bind(namespace)
        .bind(key)
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_common::types::Reflection;
    use serde_json::json;
    use tempfile::TempDir;

    fn namespace(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    async fn exercise(kv: KvStore) {
        let ns = namespace(&["memories", "assistant-1"]);
        assert!(kv.get_item(&ns, "reflection").await.expect("get should succeed").is_none());

        kv.put_item(&ns, "reflection", json!({"styleRules": ["terse"], "content": []}))
            .await
            .expect("put should succeed");
        kv.put_item(&ns, "reflection", json!({"styleRules": ["warm"], "content": ["likes tea"]}))
            .await
            .expect("overwrite should succeed");

        let reflection: Reflection = kv
            .get_json(&ns, "reflection")
            .await
            .expect("get_json should succeed")
            .expect("item should exist");
        assert_eq!(reflection.style_rules, vec!["warm".to_owned()]);
        assert_eq!(reflection.content, vec!["likes tea".to_owned()]);

        let other = namespace(&["memories", "assistant-2"]);
        assert!(kv.get_item(&other, "reflection").await.expect("get should succeed").is_none());

        kv.delete_item(&ns, "reflection").await.expect("delete should succeed");
        let error = kv.delete_item(&ns, "reflection").await.expect_err("second delete fails");
        assert!(matches!(error, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn namespaces_cannot_alias_through_the_separator() {
        let kv = KvStore::memory();
        kv.put_item(&namespace(&["custom_actions", "a", "b"]), "actions", json!({}))
            .await
            .expect("plain segments should be accepted");

        let aliased = namespace(&["custom_actions", "a/b"]);
        let error = kv.get_item(&aliased, "actions").await.expect_err("slash segment should fail");
        assert!(matches!(error, StoreError::Validation(_)));
        let error = kv
            .put_item(&aliased, "actions", json!({"x": 1}))
            .await
            .expect_err("slash segment should fail");
        assert!(matches!(error, StoreError::Validation(_)));
        let error = kv
            .delete_item(&namespace(&["custom_actions", ""]), "actions")
            .await
            .expect_err("empty segment should fail");
        assert!(matches!(error, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn memory_kv_round_trip() {
        exercise(KvStore::memory()).await;
    }

    #[tokio::test]
    async fn sqlite_kv_round_trip() {
        let dir = TempDir::new().expect("temp dir should be created");
        let store = SqliteStore::open(dir.path().join("kv.db")).expect("sqlite should open");
        exercise(KvStore::Sqlite(store)).await;
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let error = KvStore::memory()
            .put_item(&namespace(&["x"]), "", json!(1))
            .await
            .expect_err("empty key should fail");
        assert!(matches!(error, StoreError::Validation(_)));
    }
}
