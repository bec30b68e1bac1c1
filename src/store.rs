//! Local store: key-based persistence of whole JSON collections in SQLite.
//!
//! Each collection (notices, feedback, audio map) lives as one JSON document
//! under a fixed key. There is no partial-key update primitive: writers
//! read-modify-write the full collection, and a per-key lock serializes
//! concurrent writers to the same key.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::error::PortalError;
use crate::types::{Notice, VoiceFeedback};

pub const NOTICES_KEY: &str = "panchayat_notices";
pub const FEEDBACK_KEY: &str = "panchayat_feedback";
pub const AUDIO_KEY: &str = "panchayat_audio";

const COLLECTION_KEYS: [&str; 3] = [NOTICES_KEY, FEEDBACK_KEY, AUDIO_KEY];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreUsage {
    pub used: usize,
    pub total: usize,
}

/// Persistence contract for the offline cache. Survives restarts,
/// capacity-bounded.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn load_notices(&self) -> Result<Vec<Notice>, PortalError>;
    async fn save_notices(&self, notices: &[Notice]) -> Result<(), PortalError>;
    async fn load_feedback(&self) -> Result<Vec<VoiceFeedback>, PortalError>;
    async fn save_feedback(&self, feedback: &[VoiceFeedback]) -> Result<(), PortalError>;
    /// Append one feedback item, serialized against other feedback writers
    /// (there is no partial-key update; this is a locked read-modify-write).
    async fn append_feedback(&self, item: &VoiceFeedback) -> Result<(), PortalError>;
    /// Store one audio artifact (data URI) in the audio map.
    async fn save_audio(&self, notice_id: &str, data_uri: &str) -> Result<(), PortalError>;
    async fn load_audio(&self, notice_id: &str) -> Result<Option<String>, PortalError>;
    async fn clear(&self) -> Result<(), PortalError>;
    async fn usage(&self) -> Result<StoreUsage, PortalError>;
}

/// Set restrictive file permissions (0600) on the database and WAL files.
#[cfg(unix)]
fn set_db_file_permissions(db_path: &str) {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::Permissions::from_mode(0o600);
    if let Err(e) = std::fs::set_permissions(db_path, mode.clone()) {
        tracing::warn!("Failed to set permissions on {}: {}", db_path, e);
    }
    for suffix in &["-wal", "-shm"] {
        let path = format!("{}{}", db_path, suffix);
        if std::path::Path::new(&path).exists() {
            if let Err(e) = std::fs::set_permissions(&path, mode.clone()) {
                tracing::warn!("Failed to set permissions on {}: {}", path, e);
            }
        }
    }
}

pub struct SqliteLocalStore {
    pool: SqlitePool,
    capacity_bytes: usize,
    locks: HashMap<&'static str, Mutex<()>>,
}

impl SqliteLocalStore {
    pub async fn new(db_path: &str, capacity_bytes: usize) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collections (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        #[cfg(unix)]
        set_db_file_permissions(db_path);

        let locks = COLLECTION_KEYS.iter().map(|k| (*k, Mutex::new(()))).collect();

        Ok(Self {
            pool,
            capacity_bytes,
            locks,
        })
    }

    /// Shared handle for modules that keep their own tables (chats, users)
    /// in the same database file.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn lock_for(&self, key: &'static str) -> &Mutex<()> {
        // COLLECTION_KEYS is exhaustive over the keys this type touches.
        &self.locks[key]
    }

    async fn read_raw(&self, key: &str) -> Result<Option<String>, PortalError> {
        let row = sqlx::query("SELECT data FROM collections WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortalError::storage(e.to_string()))?;
        Ok(row.map(|r| r.get::<String, _>("data")))
    }

    async fn write_raw(&self, key: &str, data: &str) -> Result<(), PortalError> {
        self.check_capacity(key, data.len()).await?;
        sqlx::query(
            "INSERT INTO collections (key, data, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(data)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PortalError::storage(e.to_string()))?;
        Ok(())
    }

    /// Reject a write that would push the cache past its budget. Counts the
    /// incoming document in place of the key's current one.
    async fn check_capacity(&self, key: &str, incoming: usize) -> Result<(), PortalError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(LENGTH(data)), 0) AS used FROM collections WHERE key != ?",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortalError::storage(e.to_string()))?;
        let others: i64 = row.get("used");
        if others as usize + incoming > self.capacity_bytes {
            return Err(PortalError::storage(format!(
                "offline cache capacity exceeded ({} + {} > {} bytes)",
                others, incoming, self.capacity_bytes
            )));
        }
        Ok(())
    }

    async fn load_collection<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Vec<T>, PortalError> {
        match self.read_raw(key).await? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| PortalError::storage(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save_collection<T: serde::Serialize>(
        &self,
        key: &'static str,
        items: &[T],
    ) -> Result<(), PortalError> {
        let _guard = self.lock_for(key).lock().await;
        let raw = serde_json::to_string(items).map_err(|e| PortalError::storage(e.to_string()))?;
        self.write_raw(key, &raw).await
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn load_notices(&self) -> Result<Vec<Notice>, PortalError> {
        self.load_collection(NOTICES_KEY).await
    }

    async fn save_notices(&self, notices: &[Notice]) -> Result<(), PortalError> {
        self.save_collection(NOTICES_KEY, notices).await
    }

    async fn load_feedback(&self) -> Result<Vec<VoiceFeedback>, PortalError> {
        self.load_collection(FEEDBACK_KEY).await
    }

    async fn save_feedback(&self, feedback: &[VoiceFeedback]) -> Result<(), PortalError> {
        self.save_collection(FEEDBACK_KEY, feedback).await
    }

    async fn append_feedback(&self, item: &VoiceFeedback) -> Result<(), PortalError> {
        let _guard = self.lock_for(FEEDBACK_KEY).lock().await;
        let mut feedback: Vec<VoiceFeedback> = match self.read_raw(FEEDBACK_KEY).await? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| PortalError::storage(e.to_string()))?
            }
            None => Vec::new(),
        };
        feedback.push(item.clone());
        let raw =
            serde_json::to_string(&feedback).map_err(|e| PortalError::storage(e.to_string()))?;
        self.write_raw(FEEDBACK_KEY, &raw).await
    }

    async fn save_audio(&self, notice_id: &str, data_uri: &str) -> Result<(), PortalError> {
        // Read-modify-write of the whole map, under the audio key's lock.
        let _guard = self.lock_for(AUDIO_KEY).lock().await;
        let mut map: HashMap<String, String> = match self.read_raw(AUDIO_KEY).await? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| PortalError::storage(e.to_string()))?
            }
            None => HashMap::new(),
        };
        map.insert(notice_id.to_string(), data_uri.to_string());
        let raw = serde_json::to_string(&map).map_err(|e| PortalError::storage(e.to_string()))?;
        self.write_raw(AUDIO_KEY, &raw).await
    }

    async fn load_audio(&self, notice_id: &str) -> Result<Option<String>, PortalError> {
        match self.read_raw(AUDIO_KEY).await? {
            Some(raw) => {
                let map: Value =
                    serde_json::from_str(&raw).map_err(|e| PortalError::storage(e.to_string()))?;
                Ok(map
                    .get(notice_id)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()))
            }
            None => Ok(None),
        }
    }

    async fn clear(&self) -> Result<(), PortalError> {
        for key in COLLECTION_KEYS {
            let _guard = self.lock_for(key).lock().await;
            sqlx::query("DELETE FROM collections WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| PortalError::storage(e.to_string()))?;
        }
        Ok(())
    }

    async fn usage(&self) -> Result<StoreUsage, PortalError> {
        let row = sqlx::query("SELECT COALESCE(SUM(LENGTH(data)), 0) AS used FROM collections")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PortalError::storage(e.to_string()))?;
        let used: i64 = row.get("used");
        Ok(StoreUsage {
            used: used as usize,
            total: self.capacity_bytes,
        })
    }
}
