//! Store backed by an LMDB environment shared by processes on one host.
//!
//! Uses the heed crate (Rust bindings for LMDB). Entries are stored as JSON
//! under their key in the environment's single unnamed database.
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get` and `has`
//! - Write transactions for `set`, `delete` and `clear`
//!
//! `clear` empties the whole database, including entries written by other
//! processes sharing the environment.

use std::path::{Path, PathBuf};

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use kiln_core::{CacheResult, Candidate, Entry};
use tracing::debug;

use crate::record::io_error;
use crate::store::{backend_error, decode_entry, encode_entry, CacheStats, CacheStore};

const BACKEND: &str = "lmdb";

/// LMDB-backed cache store.
///
/// # Example
///
/// ```ignore
/// use kiln_storage::{CacheStore, LmdbStore};
///
/// let mut store = LmdbStore::open("/tmp/kiln-cache", 64)?;
/// store.set("config/app.pkl", Entry::new(output).into())?;
/// ```
pub struct LmdbStore {
    env: Env,
    db: Database<Str, Bytes>,
    path: PathBuf,
    hits: u64,
    misses: u64,
}

impl LmdbStore {
    /// Open (or create) an environment in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open(path: impl AsRef<Path>, max_size_mb: usize) -> CacheResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| io_error(path, e))?;

        // SAFETY: the environment is opened once per store and the directory is
        // not truncated or remapped while the store is alive.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path)
        }
        .map_err(|e| backend_error(BACKEND, e))?;

        let mut wtxn = env.write_txn().map_err(|e| backend_error(BACKEND, e))?;
        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| backend_error(BACKEND, e))?;
        wtxn.commit().map_err(|e| backend_error(BACKEND, e))?;

        debug!(path = %path.display(), max_size_mb, "opened lmdb cache");

        Ok(Self {
            env,
            db,
            path: path.to_path_buf(),
            hits: 0,
            misses: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self, key: &str) -> CacheResult<Option<Entry>> {
        let rtxn = self.env.read_txn().map_err(|e| backend_error(BACKEND, e))?;
        let bytes = self
            .db
            .get(&rtxn, key)
            .map_err(|e| backend_error(BACKEND, e))?;
        Ok(bytes.and_then(|b| decode_entry(BACKEND, key, b)))
    }

    fn len(&self) -> CacheResult<u64> {
        let rtxn = self.env.read_txn().map_err(|e| backend_error(BACKEND, e))?;
        self.db.len(&rtxn).map_err(|e| backend_error(BACKEND, e))
    }
}

impl CacheStore for LmdbStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get(&mut self, key: &str, default: Candidate) -> CacheResult<Option<Entry>> {
        let default = default.into_default()?;
        match self.read(key)? {
            Some(entry) => {
                self.hits += 1;
                Ok(Some(entry))
            }
            None => {
                self.misses += 1;
                Ok(default)
            }
        }
    }

    fn set(&mut self, key: &str, value: Candidate) -> CacheResult<bool> {
        let Some(entry) = value.into_entry() else {
            return Ok(false);
        };
        let bytes = encode_entry(BACKEND, &entry)?;

        let mut wtxn = self.env.write_txn().map_err(|e| backend_error(BACKEND, e))?;
        self.db
            .put(&mut wtxn, key, &bytes)
            .map_err(|e| backend_error(BACKEND, e))?;
        wtxn.commit().map_err(|e| backend_error(BACKEND, e))?;
        Ok(true)
    }

    fn delete(&mut self, key: &str) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(|e| backend_error(BACKEND, e))?;
        let deleted = self
            .db
            .delete(&mut wtxn, key)
            .map_err(|e| backend_error(BACKEND, e))?;
        wtxn.commit().map_err(|e| backend_error(BACKEND, e))?;
        Ok(deleted)
    }

    fn has(&mut self, key: &str) -> CacheResult<bool> {
        let rtxn = self.env.read_txn().map_err(|e| backend_error(BACKEND, e))?;
        let found = self
            .db
            .get(&rtxn, key)
            .map_err(|e| backend_error(BACKEND, e))?;
        Ok(found.is_some())
    }

    fn clear(&mut self) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(|e| backend_error(BACKEND, e))?;
        self.db
            .clear(&mut wtxn)
            .map_err(|e| backend_error(BACKEND, e))?;
        wtxn.commit().map_err(|e| backend_error(BACKEND, e))?;
        Ok(true)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            repairs: 0,
            entry_count: self.len().unwrap_or(0),
        }
    }
}
