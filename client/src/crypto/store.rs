//! Key Storage
//!
//! This module handles the storage and retrieval of key material in the local
//! SQLite database. Records live in three namespaces (identity, symmetric, auth)
//! and are written as JSON `StoredKey` documents so usage restrictions survive
//! a store / reload cycle. Raw records stay inside the crate; callers go through
//! the typed [`KeyStore::save`] and [`KeyStore::load`].

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::keys::{KeyClass, KeyHandle, RoomKey, StoredKey, UsageTag};

const UPSERT_KEY: &str = r#"
    INSERT INTO key_store (namespace, id, key_data, updated_at)
    VALUES ($1, $2, $3, CURRENT_TIMESTAMP)
    ON CONFLICT(namespace, id) DO UPDATE SET
        key_data = excluded.key_data,
        updated_at = CURRENT_TIMESTAMP
"#;

/// Persistent keyed storage for identity, room and auth keys
#[derive(Clone)]
pub struct KeyStore {
    /// Database connection pool
    db: SqlitePool,
}

impl KeyStore {
    /// Open (or create) the key store at `db_path`
    pub async fn open(db_path: &Path) -> CryptoResult<Self> {
        // WAL mode for concurrent access; both pragmas apply to every pooled connection
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let db = SqlitePool::connect_with(options)
            .await
            .map_err(|e| CryptoError::StoreUnavailable(format!("{}: {}", db_path.display(), e)))?;

        let store = Self::from_pool(db).await?;
        tracing::info!("Key store opened at: {}", db_path.display());
        Ok(store)
    }

    /// Open a store that lives only as long as this value
    pub async fn open_in_memory() -> CryptoResult<Self> {
        // A single connection that never expires keeps the in-memory database alive
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CryptoError::StoreUnavailable(e.to_string()))?;

        Self::from_pool(db).await
    }

    async fn from_pool(db: SqlitePool) -> CryptoResult<Self> {
        sqlx::migrate!("../migrations")
            .run(&db)
            .await
            .map_err(|e| CryptoError::StoreUnavailable(format!("Migration failed: {}", e)))?;

        Ok(Self { db })
    }

    /// Save or overwrite the record under `(class, id)`
    pub(crate) async fn put(&self, class: KeyClass, id: &str, key: &StoredKey) -> CryptoResult<()> {
        if key.class != class {
            return Err(CryptoError::UsageMismatch {
                expected: class.to_string(),
                stored: key.class.to_string(),
            });
        }
        let key_data = serde_json::to_string(key)?;

        sqlx::query(UPSERT_KEY)
            .bind(class.as_str())
            .bind(id)
            .bind(&key_data)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Load the record under `(class, id)`
    pub(crate) async fn get(&self, class: KeyClass, id: &str) -> CryptoResult<Option<StoredKey>> {
        let result = sqlx::query(r#"SELECT key_data FROM key_store WHERE namespace = $1 AND id = $2"#)
            .bind(class.as_str())
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match result {
            Some(row) => {
                let key_data: String = row.get("key_data");
                let record: StoredKey = serde_json::from_str(&key_data)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }


    /// Persist a typed handle under its own namespace
    pub async fn save<U: UsageTag>(&self, id: &str, key: &KeyHandle<U>) -> CryptoResult<()> {
        self.put(U::CLASS, id, &key.to_stored()).await
    }

    /// Load a typed handle, or `None` if nothing is stored under `id`
    pub async fn load<U: UsageTag>(&self, id: &str) -> CryptoResult<Option<KeyHandle<U>>> {
        match self.get(U::CLASS, id).await? {
            Some(record) => Ok(Some(KeyHandle::from_stored(&record)?)),
            None => Ok(None),
        }
    }

    /// Store a new room key and drop the auth key derived from the previous one
    pub async fn replace_room_key(&self, room_id: &str, key: &RoomKey) -> CryptoResult<()> {
        let key_data = serde_json::to_string(&key.to_stored())?;

        let mut tx = self.db.begin().await?;
        sqlx::query(UPSERT_KEY)
            .bind(KeyClass::Symmetric.as_str())
            .bind(room_id)
            .bind(&key_data)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM key_store WHERE namespace = $1 AND id = $2"#)
            .bind(KeyClass::Auth.as_str())
            .bind(room_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Load a typed handle, failing with `KeyNotFound` if absent
    pub async fn require<U: UsageTag>(&self, id: &str) -> CryptoResult<KeyHandle<U>> {
        self.load(id).await?.ok_or_else(|| CryptoError::KeyNotFound {
            class: U::CLASS,
            id: id.to_string(),
        })
    }

    /// Check if a record exists
    pub async fn contains(&self, class: KeyClass, id: &str) -> CryptoResult<bool> {
        let result = sqlx::query(r#"SELECT 1 FROM key_store WHERE namespace = $1 AND id = $2"#)
            .bind(class.as_str())
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(result.is_some())
    }

    /// Delete a single record
    pub async fn delete(&self, class: KeyClass, id: &str) -> CryptoResult<()> {
        sqlx::query(r#"DELETE FROM key_store WHERE namespace = $1 AND id = $2"#)
            .bind(class.as_str())
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Remove the room key and auth key of a room
    pub async fn purge_room(&self, room_id: &str) -> CryptoResult<()> {
        sqlx::query(r#"DELETE FROM key_store WHERE id = $1 AND namespace IN ('symmetric', 'auth')"#)
            .bind(room_id)
            .execute(&self.db)
            .await?;

        tracing::info!("Purged keys for room: {}", room_id);
        Ok(())
    }

    /// All ids stored in a namespace
    pub async fn list_ids(&self, class: KeyClass) -> CryptoResult<Vec<String>> {
        let results = sqlx::query(r#"SELECT id FROM key_store WHERE namespace = $1 ORDER BY id"#)
            .bind(class.as_str())
            .fetch_all(&self.db)
            .await?;

        Ok(results.into_iter().map(|r| r.get("id")).collect())
    }
}
