use chrono::Utc;
use codesaga_core::{BlobError, BlobStore, WriteGuard};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod file;

pub use file::FileBlobStore;

pub const BLOB_SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const UPSERT_BLOB: &str = "
    INSERT INTO kv_blobs (key, value, updated_at)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(key) DO UPDATE SET
        value=excluded.value,
        updated_at=excluded.updated_at
";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid blob key '{0}'")]
    InvalidKey(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

impl From<StorageError> for BlobError {
    fn from(err: StorageError) -> Self {
        BlobError::Backend(err.to_string())
    }
}

/// Key-value blobs in a single SQLite table.
pub struct SqliteBlobStore {
    conn: Connection,
}

impl SqliteBlobStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > BLOB_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: BLOB_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_kv_blobs.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            tracing::debug!("blob store migrated to schema 1");
        }

        Ok(())
    }

    pub fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM kv_blobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn
            .execute(UPSERT_BLOB, params![key, value, Utc::now().to_rfc3339()])?;
        Ok(())
    }

    /// Writes `value` if `guard` accepts the current one. The read and the
    /// write share an immediate transaction, so no other connection can
    /// write in between.
    pub fn write_if(
        &self,
        key: &str,
        value: &str,
        guard: WriteGuard<'_>,
    ) -> Result<bool, StorageError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM kv_blobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        if !guard(current.as_deref()) {
            return Ok(false);
        }
        tx.execute(UPSERT_BLOB, params![key, value, Utc::now().to_rfc3339()])?;
        tx.commit()?;
        Ok(true)
    }

    pub fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let changes = self
            .conn
            .execute("DELETE FROM kv_blobs WHERE key = ?1", params![key])?;
        Ok(changes > 0)
    }

    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv_blobs ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

impl BlobStore for SqliteBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, BlobError> {
        Ok(self.read(key)?)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BlobError> {
        Ok(self.write(key, value)?)
    }

    fn remove(&self, key: &str) -> Result<(), BlobError> {
        self.delete(key)?;
        Ok(())
    }

    fn set_if(&self, key: &str, value: &str, guard: WriteGuard<'_>) -> Result<bool, BlobError> {
        Ok(self.write_if(key, value, guard)?)
    }
}
