use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{upsert, CacheStorage, StorageResult};
use crate::models::{CachedEntry, RequestKey};

struct Namespace {
    name: String,
    entries: Vec<CachedEntry>,
}

/// In-memory namespace store.
#[derive(Default)]
pub struct MemoryStorage {
    namespaces: RwLock<Vec<Namespace>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> StorageResult<()> {
        let mut namespaces = self.namespaces.write().await;
        if !namespaces.iter().any(|ns| ns.name == name) {
            namespaces.push(Namespace {
                name: name.to_string(),
                entries: Vec::new(),
            });
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> StorageResult<bool> {
        Ok(self.namespaces.read().await.iter().any(|ns| ns.name == name))
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self
            .namespaces
            .read()
            .await
            .iter()
            .map(|ns| ns.name.clone())
            .collect())
    }

    async fn delete(&self, name: &str) -> StorageResult<bool> {
        let mut namespaces = self.namespaces.write().await;
        let before = namespaces.len();
        namespaces.retain(|ns| ns.name != name);
        Ok(namespaces.len() != before)
    }

    async fn match_in(&self, name: &str, key: &RequestKey) -> StorageResult<Option<CachedEntry>> {
        Ok(self
            .namespaces
            .read()
            .await
            .iter()
            .find(|ns| ns.name == name)
            .and_then(|ns| ns.entries.iter().find(|e| &e.key == key))
            .cloned())
    }

    async fn put(&self, name: &str, entry: CachedEntry) -> StorageResult<()> {
        self.put_all(name, vec![entry]).await
    }

    async fn put_all(&self, name: &str, entries: Vec<CachedEntry>) -> StorageResult<()> {
        let mut namespaces = self.namespaces.write().await;
        let index = match namespaces.iter().position(|ns| ns.name == name) {
            Some(i) => i,
            None => {
                namespaces.push(Namespace {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                namespaces.len() - 1
            }
        };
        for entry in entries {
            upsert(&mut namespaces[index].entries, entry);
        }
        Ok(())
    }

    async fn replace_all(&self, name: &str, entries: Vec<CachedEntry>) -> StorageResult<()> {
        let mut fresh = Vec::with_capacity(entries.len());
        for entry in entries {
            upsert(&mut fresh, entry);
        }

        let mut namespaces = self.namespaces.write().await;
        match namespaces.iter_mut().find(|ns| ns.name == name) {
            Some(ns) => ns.entries = fresh,
            None => namespaces.push(Namespace {
                name: name.to_string(),
                entries: fresh,
            }),
        }
        Ok(())
    }

    async fn entries(&self, name: &str) -> StorageResult<Vec<CachedEntry>> {
        Ok(self
            .namespaces
            .read()
            .await
            .iter()
            .find(|ns| ns.name == name)
            .map(|ns| ns.entries.clone())
            .unwrap_or_default())
    }
}
