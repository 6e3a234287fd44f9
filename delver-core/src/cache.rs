//! Content-addressed persistent store for search results.
//!
//! One JSON file per cache key under the cache directory. Writes go to a
//! `.tmp` sibling and are renamed into place, so concurrent same-key puts
//! are last-writer-wins with no interleaving, and an entry is durably on
//! disk before `put` returns. A corrupt entry file is treated as a miss
//! for that key only; it never prevents other keys from loading.
//!
//! Entries never expire. TTL and eviction are extension points, not part
//! of this store.

use crate::error::CacheError;
use crate::types::{CacheEntry, RawResult};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Deterministic digest of a normalized query. Identical normalized
/// queries produce identical keys regardless of invocation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a query: normalize, then SHA-256 hex digest.
    pub fn for_query(query_text: &str) -> Self {
        let normalized = normalize_query(query_text);
        let digest = Sha256::digest(normalized.as_bytes());
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        CacheKey(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize a query for cache addressing: lowercase, collapse whitespace
/// runs to single spaces, trim.
pub fn normalize_query(query_text: &str) -> String {
    query_text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filesystem-backed result cache, safe for concurrent use.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| CacheError::CreateDir {
            dir: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Look up an entry. Returns `None` on a miss or a corrupt entry file.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cache entry, treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<CacheEntry>(&data) {
            Ok(entry) => {
                debug!(key = %key, results = entry.raw_results.len(), "Cache hit");
                Some(entry)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt cache entry, treating as miss");
                None
            }
        }
    }

    /// Store the results of one external fetch under `key`.
    ///
    /// The entry is fully on disk before this returns. A concurrent put to
    /// the same key is resolved by the atomic rename: last writer wins.
    pub fn put(
        &self,
        key: &CacheKey,
        query_text: &str,
        raw_results: &[RawResult],
    ) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry {
            key: key.as_str().to_string(),
            query_text: query_text.to_string(),
            raw_results: raw_results.to_vec(),
            fetched_at: Utc::now(),
        };

        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&entry).map_err(|e| CacheError::Write {
            key: key.as_str().to_string(),
            source: std::io::Error::other(e),
        })?;
        std::fs::write(&tmp, json.as_bytes()).map_err(|source| CacheError::Write {
            key: key.as_str().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| CacheError::Write {
            key: key.as_str().to_string(),
            source,
        })?;

        debug!(key = %key, results = raw_results.len(), "Cache entry written");
        Ok(entry)
    }

    /// The cache directory this store reads and writes.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}
