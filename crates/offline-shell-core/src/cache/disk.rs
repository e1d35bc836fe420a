//! File-backed namespace store.
//!
//! Each namespace is a pretty-printed JSON file in the cache directory. The
//! real namespace name lives inside the file; the file stem is an escaped form
//! of it. Writes go to a temporary file that is renamed into place, so readers
//! never observe a half-written namespace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{upsert, CacheStorage, StorageError, StorageResult};
use crate::models::{CachedEntry, RequestKey};

const FILE_EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamespaceFile {
    name: String,
    created_at: DateTime<Utc>,
    entries: Vec<CachedEntry>,
}

impl NamespaceFile {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }
}

pub struct DiskStorage {
    cache_dir: PathBuf,
    /// Serializes read-modify-write cycles on namespace files.
    write_lock: Mutex<()>,
}

impl DiskStorage {
    pub fn new(cache_dir: PathBuf) -> StorageResult<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Escape a namespace name into a file stem. Bytes outside
    /// `[A-Za-z0-9-.]` become `_xx` hex, so distinct names never collide.
    fn file_stem(name: &str) -> String {
        let mut stem = String::with_capacity(name.len());
        for b in name.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'.' {
                stem.push(b as char);
            } else {
                stem.push_str(&format!("_{:02x}", b));
            }
        }
        stem
    }

    /// Reverse of [`Self::file_stem`]. `None` if the stem is not one we wrote.
    fn name_from_stem(stem: &str) -> Option<String> {
        let bytes = stem.as_bytes();
        let mut name = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'_' {
                let hex = stem.get(i + 1..i + 3)?;
                name.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            } else {
                name.push(bytes[i]);
                i += 1;
            }
        }
        String::from_utf8(name).ok()
    }

    fn namespace_path(&self, name: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", Self::file_stem(name), FILE_EXTENSION))
    }

    async fn read_file(path: &Path) -> StorageResult<Option<NamespaceFile>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file = serde_json::from_str(&contents).map_err(|source| StorageError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(file))
    }

    async fn load(&self, name: &str) -> StorageResult<Option<NamespaceFile>> {
        Self::read_file(&self.namespace_path(name)).await
    }

    async fn save(&self, file: &NamespaceFile) -> StorageResult<()> {
        let path = self.namespace_path(&file.name);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(file)?;
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(namespace = %file.name, entries = file.entries.len(), "Saved cache namespace");
        Ok(())
    }

    /// Every namespace on disk with its creation time, oldest first.
    ///
    /// A file that cannot be parsed is still listed under the name its stem
    /// decodes to, with no creation time, so it can be found and deleted.
    async fn listing(&self) -> StorageResult<Vec<(String, Option<DateTime<Utc>>)>> {
        let mut listing = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.cache_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            match Self::read_file(&path).await {
                Ok(Some(file)) => listing.push((file.name, Some(file.created_at))),
                Ok(None) => {}
                Err(e) => {
                    let name = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(Self::name_from_stem);
                    match name {
                        Some(name) => {
                            warn!(path = %path.display(), error = %e, "Unreadable cache file");
                            listing.push((name, None));
                        }
                        None => {
                            warn!(path = %path.display(), error = %e, "Skipping foreign cache file");
                        }
                    }
                }
            }
        }
        listing.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(listing)
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.load(name).await?.is_none() {
            self.save(&NamespaceFile::new(name)).await?;
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(self.namespace_path(name)).await?)
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self
            .listing()
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    async fn delete(&self, name: &str) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.namespace_path(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn match_in(&self, name: &str, key: &RequestKey) -> StorageResult<Option<CachedEntry>> {
        Ok(self
            .load(name)
            .await?
            .and_then(|f| f.entries.into_iter().find(|e| &e.key == key)))
    }

    async fn put(&self, name: &str, entry: CachedEntry) -> StorageResult<()> {
        self.put_all(name, vec![entry]).await
    }

    async fn put_all(&self, name: &str, entries: Vec<CachedEntry>) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self
            .load(name)
            .await?
            .unwrap_or_else(|| NamespaceFile::new(name));
        for entry in entries {
            upsert(&mut file.entries, entry);
        }
        self.save(&file).await
    }

    async fn replace_all(&self, name: &str, entries: Vec<CachedEntry>) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        // An unreadable file is overwritten rather than blocking the swap.
        let created_at = match self.load(name).await {
            Ok(Some(file)) => file.created_at,
            Ok(None) | Err(StorageError::Corrupt { .. }) => Utc::now(),
            Err(e) => return Err(e),
        };
        let mut file = NamespaceFile {
            name: name.to_string(),
            created_at,
            entries: Vec::with_capacity(entries.len()),
        };
        for entry in entries {
            upsert(&mut file.entries, entry);
        }
        self.save(&file).await
    }

    async fn entries(&self, name: &str) -> StorageResult<Vec<CachedEntry>> {
        Ok(self.load(name).await?.map(|f| f.entries).unwrap_or_default())
    }
}
