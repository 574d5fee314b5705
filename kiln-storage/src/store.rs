//! The key/entry store contract shared by every cache backend.

use kiln_core::{CacheError, CacheResult, Candidate, Entry};
use tracing::warn;

/// Cache backend contract.
///
/// Keys are source identifiers, usually module paths. Stores own their
/// entries; `get` hands out copies, so changing a returned [`Entry`] has no
/// effect until it is passed back to `set`.
///
/// Batch operations are plain per-key loops and are never atomic: a failing
/// `set_multiple` leaves the writes before the failure in place.
pub trait CacheStore {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Look up `key`, returning `default` on a miss.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidDefault`] if `default` is not an entry, and
    /// backend failures.
    fn get(&mut self, key: &str, default: Candidate) -> CacheResult<Option<Entry>>;

    /// Store `value` under `key`. Returns `false` without writing when the
    /// value is not an entry.
    fn set(&mut self, key: &str, value: Candidate) -> CacheResult<bool>;

    /// Remove `key`.
    fn delete(&mut self, key: &str) -> CacheResult<bool>;

    fn has(&mut self, key: &str) -> CacheResult<bool>;

    /// Remove every entry. Shared backends purge their whole namespace.
    fn clear(&mut self) -> CacheResult<bool>;

    /// Look up several keys, in order.
    fn get_multiple(
        &mut self,
        keys: &[&str],
        default: Candidate,
    ) -> CacheResult<Vec<(String, Option<Entry>)>> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            found.push((key.to_string(), self.get(key, default.clone())?));
        }
        Ok(found)
    }

    /// Store several values, stopping at the first refused one.
    fn set_multiple(&mut self, values: Vec<(String, Candidate)>) -> CacheResult<bool> {
        for (key, value) in values {
            if !self.set(&key, value)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Delete several keys. Every key is attempted.
    fn delete_multiple(&mut self, keys: &[&str]) -> CacheResult<bool> {
        let mut all = true;
        for key in keys {
            all &= self.delete(key)?;
        }
        Ok(all)
    }

    /// Bring the store up to date with its backing medium.
    fn load(&mut self) -> CacheResult<()> {
        Ok(())
    }

    /// Write pending changes to the backing medium.
    fn persist(&mut self) -> CacheResult<()> {
        Ok(())
    }

    /// Usage counters since the store was opened.
    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

impl<S: CacheStore + ?Sized> CacheStore for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn get(&mut self, key: &str, default: Candidate) -> CacheResult<Option<Entry>> {
        (**self).get(key, default)
    }

    fn set(&mut self, key: &str, value: Candidate) -> CacheResult<bool> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &str) -> CacheResult<bool> {
        (**self).delete(key)
    }

    fn has(&mut self, key: &str) -> CacheResult<bool> {
        (**self).has(key)
    }

    fn clear(&mut self) -> CacheResult<bool> {
        (**self).clear()
    }

    fn load(&mut self) -> CacheResult<()> {
        (**self).load()
    }

    fn persist(&mut self) -> CacheResult<()> {
        (**self).persist()
    }

    fn stats(&self) -> CacheStats {
        (**self).stats()
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups that found an entry.
    pub hits: u64,
    /// Number of lookups that fell back on the default.
    pub misses: u64,
    /// Number of hits that had to be reconciled (corrupted or stale).
    pub repairs: u64,
    /// Number of entries currently held, when the backend can tell cheaply.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// SHARED BACKEND PAYLOADS
// ============================================================================

/// Serialize an entry for a shared backend.
pub(crate) fn encode_entry(backend: &str, entry: &Entry) -> CacheResult<Vec<u8>> {
    serde_json::to_vec(entry).map_err(|e| CacheError::Backend {
        backend: backend.to_string(),
        reason: format!("cannot serialize entry: {e}"),
    })
}

/// Deserialize an entry read from a shared backend. Undecodable payloads are
/// logged and read as a miss.
pub(crate) fn decode_entry(backend: &str, key: &str, bytes: &[u8]) -> Option<Entry> {
    match serde_json::from_slice(bytes) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(backend, key, error = %e, "ignoring undecodable cache payload");
            None
        }
    }
}

pub(crate) fn backend_error(backend: &str, e: impl std::fmt::Display) -> CacheError {
    CacheError::Backend {
        backend: backend.to_string(),
        reason: e.to_string(),
    }
}
