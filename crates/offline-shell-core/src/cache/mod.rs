//! Named cache namespaces for request/response pairs.
//!
//! This module provides the `CacheStorage` trait plus two backends:
//! - `MemoryStorage`: process-local, used by tests and short-lived hosts
//! - `DiskStorage`: one JSON file per namespace, survives restarts
//!
//! Namespaces are listed in creation order. Writing to a namespace that
//! does not exist creates it; reading from one does not.

pub mod disk;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CachedEntry, RequestKey};

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize cache {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the namespace if it does not exist yet.
    async fn open(&self, name: &str) -> StorageResult<()>;

    async fn has(&self, name: &str) -> StorageResult<bool>;

    /// Names of every namespace, oldest first.
    async fn keys(&self) -> StorageResult<Vec<String>>;

    /// Delete a namespace and all its entries. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> StorageResult<bool>;

    /// Look up `key` in a single namespace.
    async fn match_in(&self, name: &str, key: &RequestKey) -> StorageResult<Option<CachedEntry>>;

    /// Store one entry, replacing any previous entry for the same key.
    async fn put(&self, name: &str, entry: CachedEntry) -> StorageResult<()>;

    /// Store a batch of entries as one write: either all land or none do.
    async fn put_all(&self, name: &str, entries: Vec<CachedEntry>) -> StorageResult<()>;

    /// Swap the whole contents of a namespace for `entries` in one write,
    /// creating it if needed.
    async fn replace_all(&self, name: &str, entries: Vec<CachedEntry>) -> StorageResult<()>;

    /// Every entry in a namespace, in insertion order. Empty if the namespace is missing.
    async fn entries(&self, name: &str) -> StorageResult<Vec<CachedEntry>>;
}

/// Insert or replace `entry` by key, keeping the position of a replaced entry.
pub(crate) fn upsert(entries: &mut Vec<CachedEntry>, entry: CachedEntry) {
    match entries.iter_mut().find(|e| e.key == entry.key) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}
