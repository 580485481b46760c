//! Persisted key-value storage
//!
//! The legacy on-device snapshot is a flat map of string keys to JSON
//! string values. Migration only needs to enumerate and read it; writes are
//! kept for fixtures and tooling.

pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

pub use sqlite::SqliteStorage;

/// Async key-value store with JSON string values
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Values for `keys`, in the same order; missing keys yield `None`
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>>;

    async fn all_keys(&self) -> Result<Vec<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-filled with `entries`
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .map(|k| (k.clone(), entries.get(k).cloned()))
            .collect())
    }

    async fn all_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::from_entries([("b", "2"), ("a", "1")]);

        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(storage.all_keys().await.unwrap(), vec!["a", "b"]);

        let got = storage
            .multi_get(&["b".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(
            got,
            vec![("b".to_string(), Some("2".to_string())), ("missing".to_string(), None)]
        );

        storage.set("c", "3").await.unwrap();
        storage.remove("a").await.unwrap();
        assert_eq!(storage.all_keys().await.unwrap(), vec!["b", "c"]);
    }
}
