//! Disk-backed cache backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/
//!   <percent-encoded cache name>/
//!     <sha256(method + url)>.json     one CacheEntry per file
//! ```
//!
//! Entries are written to a temporary file and renamed into place, so a
//! reader sees either the old entry or the new one. Renaming a cache over an
//! existing one first moves the old directory aside under a name containing
//! `+`, which percent-encoded cache names never contain.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::{CacheEntry, CacheStore, RequestKey};
use crate::error::{SwError, SwResult};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Caches persisted as JSON files.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Use `root` as the storage directory, creating it if needed.
    pub async fn open_root(root: impl Into<PathBuf>) -> SwResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Disk cache store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, name: &str) -> PathBuf {
        self.root.join(urlencoding::encode(name).as_ref())
    }

    fn aside_dir(&self, name: &str) -> PathBuf {
        self.root.join(format!(
            "{}+old-{}-{}",
            urlencoding::encode(name),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    fn entry_path(&self, name: &str, key: &RequestKey) -> PathBuf {
        self.cache_dir(name).join(format!("{}.json", key.digest()))
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn open(&self, name: &str) -> SwResult<()> {
        fs::create_dir_all(self.cache_dir(name)).await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> SwResult<bool> {
        match fs::metadata(self.cache_dir(name)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> SwResult<()> {
        let dir = self.cache_dir(name);
        fs::create_dir_all(&dir).await?;

        let path = self.entry_path(name, &entry.key);
        let tmp = path.with_extension(format!(
            "tmp-{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let json = serde_json::to_vec(&entry)?;

        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, name: &str, key: &RequestKey) -> SwResult<Option<CacheEntry>> {
        let raw = match fs::read(self.entry_path(name, key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry = serde_json::from_slice(&raw)?;
        // Digest collision.
        if &entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn keys(&self, name: &str) -> SwResult<Vec<RequestKey>> {
        let mut dir = match fs::read_dir(self.cache_dir(name)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read(&path).await?;
            match serde_json::from_slice::<CacheEntry>(&raw) {
                Ok(entry) => keys.push(entry.key),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        Ok(keys)
    }

    async fn delete(&self, name: &str) -> SwResult<bool> {
        match fs::remove_dir_all(self.cache_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SwError::cache(format!("cannot delete cache {name}: {e}"))),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> SwResult<()> {
        if !self.has(from).await? {
            return Err(SwError::cache(format!("cannot rename missing cache {from}")));
        }

        let target = self.cache_dir(to);
        let aside = if self.has(to).await? {
            let aside = self.aside_dir(to);
            fs::rename(&target, &aside).await?;
            Some(aside)
        } else {
            None
        };

        if let Err(e) = fs::rename(self.cache_dir(from), &target).await {
            if let Some(aside) = &aside {
                fs::rename(aside, &target).await?;
            }
            return Err(SwError::cache(format!("cannot rename cache {from} to {to}: {e}")));
        }

        if let Some(aside) = aside {
            if let Err(e) = fs::remove_dir_all(&aside).await {
                warn!(dir = %aside.display(), error = %e, "Leaving replaced cache directory behind");
            }
        }
        debug!(from, to, "Cache renamed");
        Ok(())
    }

    async fn names(&self) -> SwResult<Vec<String>> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let raw = item.file_name();
            let Some(encoded) = raw.to_str() else {
                continue;
            };
            if encoded.contains('+') {
                continue;
            }
            match urlencoding::decode(encoded) {
                Ok(name) => names.push(name.into_owned()),
                Err(e) => warn!(dir = encoded, error = %e, "Skipping foreign directory"),
            }
        }
        names.sort();
        Ok(names)
    }
}
