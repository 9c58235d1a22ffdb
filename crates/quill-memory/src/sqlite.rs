use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::durable::{BoxFuture, DurableStore};
use crate::error::MemoryError;

/// [`DurableStore`] backed by a single `kv_entries` table.
#[derive(Debug, Clone)]
pub struct SqliteDurableStore {
    pool: SqlitePool,
}

impl SqliteDurableStore {
    /// Open (or create) the `SQLite` database and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database on a single connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self, MemoryError> {
        let (url, max_connections) = if path == ":memory:" {
            ("sqlite::memory:".to_string(), 1)
        } else {
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MemoryError::Durable(format!("create {}: {e}", parent.display())))?;
            }
            (format!("sqlite:{path}?mode=rwc"), 4)
        };

        let opts = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations first.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!("durable store migrations applied");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl DurableStore for SqliteDurableStore {
    fn put(
        &self,
        namespace: &str,
        key: &str,
        value: String,
    ) -> BoxFuture<'_, Result<(), MemoryError>> {
        let namespace = namespace.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO kv_entries (namespace, key, value) VALUES (?, ?, ?) \
                 ON CONFLICT(namespace, key) DO UPDATE SET \
                 value = excluded.value, updated_at = datetime('now')",
            )
            .bind(&namespace)
            .bind(&key)
            .bind(&value)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn get(&self, namespace: &str, key: &str) -> BoxFuture<'_, Result<Option<String>, MemoryError>> {
        let namespace = namespace.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT value FROM kv_entries WHERE namespace = ? AND key = ?")
                    .bind(&namespace)
                    .bind(&key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(|(v,)| v))
        })
    }

    fn get_all(&self, namespace: &str) -> BoxFuture<'_, Result<Vec<(String, String)>, MemoryError>> {
        let namespace = namespace.to_owned();
        Box::pin(async move {
            let rows: Vec<(String, String)> = sqlx::query_as(
                "SELECT key, value FROM kv_entries WHERE namespace = ? ORDER BY key ASC",
            )
            .bind(&namespace)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
    }

    fn delete(&self, namespace: &str, key: &str) -> BoxFuture<'_, Result<(), MemoryError>> {
        let namespace = namespace.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            sqlx::query("DELETE FROM kv_entries WHERE namespace = ? AND key = ?")
                .bind(&namespace)
                .bind(&key)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn clear(&self, namespace: &str) -> BoxFuture<'_, Result<(), MemoryError>> {
        let namespace = namespace.to_owned();
        Box::pin(async move {
            sqlx::query("DELETE FROM kv_entries WHERE namespace = ?")
                .bind(&namespace)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let store = SqliteDurableStore::open(":memory:").await.unwrap();
        store.put("records", "n1_chunk_0", "{\"v\":1}".into()).await.unwrap();
        store.put("records", "n1_chunk_0", "{\"v\":2}".into()).await.unwrap();
        let value = store.get("records", "n1_chunk_0").await.unwrap();
        assert_eq!(value.as_deref(), Some("{\"v\":2}"));
        assert_eq!(store.get_all("records").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = SqliteDurableStore::open(":memory:").await.unwrap();
        store.put("a", "k", "1".into()).await.unwrap();
        store.put("b", "k", "2".into()).await.unwrap();
        store.clear("a").await.unwrap();
        assert!(store.get("a", "k").await.unwrap().is_none());
        assert_eq!(store.get("b", "k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn delete_missing_key_is_ok() {
        let store = SqliteDurableStore::open(":memory:").await.unwrap();
        store.delete("a", "missing").await.unwrap();
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("quill.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteDurableStore::open(path).await.unwrap();
            store.put("ns", "k", "v".into()).await.unwrap();
            store.pool().close().await;
        }
        let store = SqliteDurableStore::open(path).await.unwrap();
        assert_eq!(store.get("ns", "k").await.unwrap().as_deref(), Some("v"));
    }
}
