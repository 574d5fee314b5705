//! Process-local store persisted as a single cache file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_core::{CacheResult, Candidate, Entry, KilnConfig};
use tracing::debug;

use crate::record;
use crate::store::{CacheStats, CacheStore};

/// In-memory map of entries, loaded from and saved to one file.
///
/// The map is `None` until a store exists: nothing was loaded, the file was
/// missing or empty, or the store was cleared. Writing into a missing store
/// starts an empty one.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    entries: Option<BTreeMap<String, Entry>>,
    hits: u64,
    misses: u64,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: None,
            hits: 0,
            misses: 0,
        }
    }

    /// Create a store at the configured cache file.
    pub fn from_config(config: &KilnConfig) -> Self {
        Self::new(config.cache_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// Whether a store exists in memory.
    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    /// All entries, in key order.
    pub fn entries(&self) -> Option<&BTreeMap<String, Entry>> {
        self.entries.as_ref()
    }

    /// Replace the in-memory store with the file contents.
    ///
    /// A missing or empty file keeps whatever is in memory, so entries set but
    /// not yet saved survive. An unreadable file is an error and also leaves
    /// the in-memory store untouched.
    pub fn load(&mut self) -> CacheResult<()> {
        let Some(entries) = record::read_file(&self.path)? else {
            debug!(path = %self.path.display(), "no cache file to load");
            return Ok(());
        };
        debug!(
            path = %self.path.display(),
            entries = entries.len(),
            "loaded cache file"
        );
        self.entries = Some(entries);
        Ok(())
    }

    /// Write the whole store to the file. A missing store is written empty.
    pub fn save(&self) -> CacheResult<()> {
        let empty = BTreeMap::new();
        let entries = self.entries.as_ref().unwrap_or(&empty);
        record::write_file(&self.path, entries)?;
        debug!(path = %self.path.display(), entries = entries.len(), "saved cache file");
        Ok(())
    }
}

impl CacheStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&mut self, key: &str, default: Candidate) -> CacheResult<Option<Entry>> {
        let default = default.into_default()?;
        match self.entries.as_ref().and_then(|m| m.get(key)) {
            Some(entry) => {
                self.hits += 1;
                Ok(Some(entry.clone()))
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
        self.entries
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), entry);
        Ok(true)
    }

    fn delete(&mut self, key: &str) -> CacheResult<bool> {
        if let Some(entries) = self.entries.as_mut() {
            entries.remove(key);
        }
        Ok(true)
    }

    fn has(&mut self, key: &str) -> CacheResult<bool> {
        Ok(self
            .entries
            .as_ref()
            .is_some_and(|m| m.contains_key(key)))
    }

    fn clear(&mut self) -> CacheResult<bool> {
        self.entries = None;
        Ok(true)
    }

    fn load(&mut self) -> CacheResult<()> {
        FileStore::load(self)
    }

    fn persist(&mut self) -> CacheResult<()> {
        self.save()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            repairs: 0,
            entry_count: self.entries.as_ref().map_or(0, |m| m.len() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::CacheError;
    use tempfile::TempDir;

    fn temp_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let store = FileStore::new(dir.path().join(".kiln.cache"));
        (store, dir)
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (mut store, _dir) = temp_store();
        assert_eq!(store.get("missing", Candidate::Absent).expect("get"), None);
    }

    #[test]
    fn test_get_missing_with_foreign_default_fails() {
        let (mut store, _dir) = temp_store();
        let err = store
            .get("missing", Candidate::from("not-an-entry"))
            .expect_err("foreign default");
        assert!(matches!(err, CacheError::InvalidDefault { .. }));
    }

    #[test]
    fn test_get_missing_returns_entry_default() {
        let (mut store, _dir) = temp_store();
        let fallback = Entry::new("fallback");
        assert_eq!(
            store.get("missing", fallback.clone().into()).expect("get"),
            Some(fallback)
        );
    }

    #[test]
    fn test_set_refuses_non_entries() {
        let (mut store, _dir) = temp_store();
        assert!(!store.set("key", Candidate::from("value")).expect("set"));
        assert!(!store.is_loaded());
        assert!(store.set("key", Entry::new("value").into()).expect("set"));
        assert!(store.has("key").expect("has"));
    }

    #[test]
    fn test_returned_entry_is_a_copy() {
        let (mut store, _dir) = temp_store();
        store.set("key", Entry::new("value").into()).expect("set");

        let mut copy = store.get("key", Candidate::Absent).expect("get").expect("hit");
        copy.content = "changed".to_string();

        let again = store.get("key", Candidate::Absent).expect("get").expect("hit");
        assert_eq!(again.content, "value");
    }

    #[test]
    fn test_clear_drops_the_store() {
        let (mut store, _dir) = temp_store();
        store.set("key", Entry::new("value").into()).expect("set");
        assert!(store.clear().expect("clear"));
        assert!(!store.is_loaded());
        assert!(!store.has("key").expect("has"));
    }

    #[test]
    fn test_save_and_load() {
        let (mut store, _dir) = temp_store();
        store.set("a.pkl", Entry::new("a").into()).expect("set");
        store.set("b.pkl", Entry::new("b").into()).expect("set");
        store.save().expect("save");

        let mut reloaded = FileStore::new(store.path());
        reloaded.load().expect("load");
        assert_eq!(reloaded.entries(), store.entries());
    }

    #[test]
    fn test_load_missing_file_leaves_no_store() {
        let (mut store, _dir) = temp_store();
        store.load().expect("missing file is not an error");
        assert!(!store.is_loaded());
    }

    #[test]
    fn test_load_missing_file_keeps_unsaved_entries() {
        let (mut store, _dir) = temp_store();
        let entry = Entry::new("a");
        store.set("a.pkl", entry.clone().into()).expect("set");

        store.load().expect("missing file is not an error");
        assert_eq!(store.get("a.pkl", Candidate::Absent).expect("get"), Some(entry));

        std::fs::write(store.path(), b"").expect("truncate");
        store.load().expect("empty file is not an error");
        assert!(store.has("a.pkl").expect("has"));
    }

    #[test]
    fn test_load_replaces_memory_with_file() {
        let (mut store, _dir) = temp_store();
        store.set("a.pkl", Entry::new("a").into()).expect("set");
        store.save().expect("save");
        store.set("b.pkl", Entry::new("b").into()).expect("set");

        store.load().expect("load");
        assert!(store.has("a.pkl").expect("has"));
        assert!(!store.has("b.pkl").expect("has"));
    }

    #[test]
    fn test_set_multiple_stops_without_rollback() {
        let (mut store, _dir) = temp_store();
        let ok = store
            .set_multiple(vec![
                ("a.pkl".to_string(), Entry::new("a").into()),
                ("b.pkl".to_string(), Candidate::from("not an entry")),
                ("c.pkl".to_string(), Entry::new("c").into()),
            ])
            .expect("no backend failure");

        assert!(!ok);
        assert!(store.has("a.pkl").expect("has"));
        assert!(!store.has("b.pkl").expect("has"));
        assert!(!store.has("c.pkl").expect("has"));
    }

    #[test]
    fn test_load_garbage_keeps_memory_store() {
        let (mut store, _dir) = temp_store();
        store.set("a.pkl", Entry::new("a").into()).expect("set");
        std::fs::write(store.path(), b"garbage").expect("write");

        assert!(store.load().is_err());
        assert!(store.has("a.pkl").expect("has"));
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let (mut store, _dir) = temp_store();
        store.set("a.pkl", Entry::new("a").into()).expect("set");
        store.get("a.pkl", Candidate::Absent).expect("get");
        store.get("b.pkl", Candidate::Absent).expect("get");

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }
}
