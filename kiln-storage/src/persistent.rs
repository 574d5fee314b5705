//! File-backed cache that heals corrupted and stale entries on read.
//!
//! Reads are lenient: a hit whose digest no longer matches its content, or
//! whose timestamp predates the source file's modification time, is replaced
//! by a reconciled copy of itself and the store is written back. The evaluator
//! is not consulted; the cached content is trusted and only its metadata is
//! refreshed.
//!
//! Audits are strict: [`PersistentCache::audit`] reports every violation
//! without touching the store, and [`PersistentCache::validate`] fails on the
//! first digest mismatch.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kiln_core::{digest, CacheError, CacheResult, Candidate, Entry, KilnConfig};
use tracing::{debug, warn};

use crate::file_store::FileStore;
use crate::store::{CacheStats, CacheStore};

/// Why an entry failed inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationReason {
    /// The stored digest does not match the content.
    DigestMismatch { expected: String, actual: String },
    /// The entry predates the source's last modification.
    Stale {
        cached_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    },
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationReason::DigestMismatch { expected, actual } => {
                write!(f, "digest mismatch: stored {expected}, computed {actual}")
            }
            ViolationReason::Stale {
                cached_at,
                modified_at,
            } => write!(
                f,
                "stale: cached at {cached_at}, source modified at {modified_at}"
            ),
        }
    }
}

/// One entry that failed inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub key: String,
    pub reason: ViolationReason,
}

/// Modification time of the file named by `key`, if it can be read.
fn modified_at(key: &str) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(key).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Check one entry. Digest mismatches win over staleness.
fn inspect(key: &str, entry: &Entry) -> Option<ViolationReason> {
    let actual = digest(&entry.content);
    if entry.hash != actual {
        return Some(ViolationReason::DigestMismatch {
            expected: entry.hash.clone(),
            actual,
        });
    }
    match modified_at(key) {
        Some(modified_at) if !entry.is_fresh_as_of(modified_at) => Some(ViolationReason::Stale {
            cached_at: entry.timestamp,
            modified_at,
        }),
        _ => None,
    }
}

/// Validated persistent cache over a [`FileStore`].
#[derive(Debug, Clone)]
pub struct PersistentCache {
    store: FileStore,
    repairs: u64,
}

impl PersistentCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: FileStore::new(path),
            repairs: 0,
        }
    }

    /// Create a cache at the configured file: explicit path, then
    /// `KILN_CACHE_FILE`, then `.kiln.cache`.
    pub fn from_config(config: &KilnConfig) -> Self {
        Self::new(config.cache_file())
    }

    pub fn cache_file(&self) -> &Path {
        self.store.path()
    }

    /// Point the cache at another file. Already loaded entries are kept.
    pub fn set_cache_file(&mut self, path: impl Into<PathBuf>) {
        self.store.set_path(path);
    }

    pub fn is_loaded(&self) -> bool {
        self.store.is_loaded()
    }

    pub fn entries(&self) -> Option<&std::collections::BTreeMap<String, Entry>> {
        self.store.entries()
    }

    /// Replace the in-memory store with the cache file contents, if there are any.
    pub fn load(&mut self) -> CacheResult<()> {
        self.store.load()
    }

    /// Write the whole store to the cache file.
    pub fn save(&self) -> CacheResult<()> {
        self.store.save()
    }

    /// Report every corrupted or stale entry, in key order.
    ///
    /// Loads the file if no store is in memory.
    ///
    /// # Errors
    ///
    /// - [`CacheError::EmptyCache`] if there is still no store after loading
    /// - [`CacheError::CorruptedCache`] if the cache file cannot be decoded
    pub fn audit(&mut self) -> CacheResult<Vec<Violation>> {
        let path = self.cache_file().display().to_string();

        if !self.store.is_loaded() {
            self.store.load().map_err(|e| CacheError::CorruptedCache {
                path: path.clone(),
                key: None,
                reason: e.to_string(),
            })?;
        }

        let Some(entries) = self.store.entries() else {
            return Err(CacheError::EmptyCache { path });
        };

        Ok(entries
            .iter()
            .filter_map(|(key, entry)| {
                inspect(key, entry).map(|reason| Violation {
                    key: key.clone(),
                    reason,
                })
            })
            .collect())
    }

    /// Fail on the first entry whose digest does not match its content.
    ///
    /// Stale entries are not corruption and pass validation.
    pub fn validate(&mut self) -> CacheResult<()> {
        let violations = self.audit()?;
        let corrupted = violations
            .into_iter()
            .find(|v| matches!(v.reason, ViolationReason::DigestMismatch { .. }));

        match corrupted {
            Some(violation) => Err(CacheError::CorruptedCache {
                path: self.cache_file().display().to_string(),
                reason: violation.reason.to_string(),
                key: Some(violation.key),
            }),
            None => Ok(()),
        }
    }
}

impl CacheStore for PersistentCache {
    fn name(&self) -> &'static str {
        "persistent"
    }

    fn get(&mut self, key: &str, default: Candidate) -> CacheResult<Option<Entry>> {
        let default = default.into_default()?;
        let Some(entry) = self.store.get(key, Candidate::Absent)? else {
            return Ok(default);
        };

        let Some(reason) = inspect(key, &entry) else {
            return Ok(Some(entry));
        };

        debug!(key, %reason, "reconciling cache entry");
        let repaired = entry.reconciled();
        self.store.delete(key)?;
        self.store.set(key, repaired.clone().into())?;
        self.repairs += 1;

        if let Err(e) = self.store.save() {
            warn!(key, error = %e, "failed to persist reconciled cache entry");
        }

        Ok(Some(repaired))
    }

    fn set(&mut self, key: &str, value: Candidate) -> CacheResult<bool> {
        self.store.set(key, value)
    }

    fn delete(&mut self, key: &str) -> CacheResult<bool> {
        self.store.delete(key)
    }

    fn has(&mut self, key: &str) -> CacheResult<bool> {
        self.store.has(key)
    }

    fn clear(&mut self) -> CacheResult<bool> {
        self.store.clear()
    }

    fn load(&mut self) -> CacheResult<()> {
        self.store.load()
    }

    fn persist(&mut self) -> CacheResult<()> {
        self.store.save()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            repairs: self.repairs,
            ..self.store.stats()
        }
    }
}
