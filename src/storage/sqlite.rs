//! SQLite storage in the React Native AsyncStorage layout
//!
//! AsyncStorage on Android keeps everything in one table,
//! `catalystLocalStorage(key TEXT PRIMARY KEY, value TEXT NOT NULL)`, so a
//! database pulled off a device can be opened here and migrated as-is.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use super::KeyValueStorage;
use crate::error::{BrightIdError, Result};

const TABLE: &str = "catalystLocalStorage";

/// AsyncStorage-compatible SQLite store
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Opening storage database");
        let conn = Connection::open(path)
            .map_err(|e| BrightIdError::Storage(format!("failed to open {}: {e}", path.display())))?;
        Self::init(conn)
    }

    /// In-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory storage database");
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );"
        ))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| BrightIdError::Storage(format!("lock poisoned: {e}")))?;
        f(&conn)
    }

    fn get_sync(conn: &Connection, key: &str) -> Result<Option<String>> {
        let mut stmt = conn.prepare_cached(&format!("SELECT value FROM {TABLE} WHERE key = ?1"))?;
        Ok(stmt.query_row([key], |row| row.get(0)).optional()?)
    }
}

#[async_trait]
impl KeyValueStorage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| Self::get_sync(conn, key))
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        self.with_conn(|conn| {
            keys.iter()
                .map(|k| Self::get_sync(conn, k).map(|value| (k.clone(), value)))
                .collect()
        })
    }

    async fn all_keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!("SELECT key FROM {TABLE} ORDER BY key"))?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {TABLE} (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = ?2"
                ),
                rusqlite::params![key, value],
            )?;
            Ok(())
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(&format!("DELETE FROM {TABLE} WHERE key = ?1"), [key])?;
            Ok(())
        })
    }
}
