//! Store backed by a Redis server shared by several hosts.
//!
//! Entries are stored as JSON strings under their key. A store opened with a
//! TTL writes every entry with that expiry. `clear` issues `FLUSHDB`, which
//! empties the whole logical database the connection points at.

use std::time::Duration;

use kiln_core::{CacheResult, Candidate, Entry};
use redis::{Client, Connection};
use tracing::debug;

use crate::store::{backend_error, decode_entry, encode_entry, CacheStats, CacheStore};

const BACKEND: &str = "redis";

/// Redis-backed cache store using a blocking connection.
pub struct NetworkStore {
    conn: Connection,
    ttl: Option<Duration>,
    hits: u64,
    misses: u64,
}

impl NetworkStore {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379/0`.
    pub fn connect(url: &str) -> CacheResult<Self> {
        let client = Client::open(url).map_err(|e| backend_error(BACKEND, e))?;
        let conn = client
            .get_connection()
            .map_err(|e| backend_error(BACKEND, e))?;
        debug!(url, "connected to redis cache");

        Ok(Self {
            conn,
            ttl: None,
            hits: 0,
            misses: 0,
        })
    }

    /// Expire every entry written from now on after `ttl`. Sub-second
    /// precision is dropped; zero disables expiry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl).filter(|t| t.as_secs() > 0);
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

impl CacheStore for NetworkStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get(&mut self, key: &str, default: Candidate) -> CacheResult<Option<Entry>> {
        let default = default.into_default()?;
        let bytes: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query(&mut self.conn)
            .map_err(|e| backend_error(BACKEND, e))?;

        match bytes.and_then(|b| decode_entry(BACKEND, key, &b)) {
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

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(bytes);
        if let Some(ttl) = self.ttl {
            cmd.arg("EX").arg(ttl.as_secs());
        }
        cmd.query::<()>(&mut self.conn)
            .map_err(|e| backend_error(BACKEND, e))?;
        Ok(true)
    }

    fn delete(&mut self, key: &str) -> CacheResult<bool> {
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query(&mut self.conn)
            .map_err(|e| backend_error(BACKEND, e))?;
        Ok(removed > 0)
    }

    fn has(&mut self, key: &str) -> CacheResult<bool> {
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query(&mut self.conn)
            .map_err(|e| backend_error(BACKEND, e))?;
        Ok(count > 0)
    }

    fn clear(&mut self) -> CacheResult<bool> {
        redis::cmd("FLUSHDB")
            .query::<()>(&mut self.conn)
            .map_err(|e| backend_error(BACKEND, e))?;
        Ok(true)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::CacheError;

    #[test]
    fn test_invalid_url_is_backend_error() {
        let err = NetworkStore::connect("not a url")
            .err()
            .expect("connect should fail");
        assert!(matches!(err, CacheError::Backend { ref backend, .. } if backend == "redis"));
    }

    #[test]
    fn test_unreachable_server_is_backend_error() {
        let err = NetworkStore::connect("redis://127.0.0.1:1/")
            .err()
            .expect("nothing listens on port 1");
        assert!(matches!(err, CacheError::Backend { .. }));
    }

    /// Runs against a live server named by `KILN_TEST_REDIS_URL`.
    #[test]
    #[ignore]
    fn test_round_trip_against_live_server() {
        let url = std::env::var("KILN_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
        let mut store = NetworkStore::connect(&url)
            .expect("connect")
            .with_ttl(Duration::from_secs(60));
        assert_eq!(store.ttl(), Some(Duration::from_secs(60)));

        let entry = Entry::new("{\"a\":1}");
        assert!(store.set("kiln-test.pkl", entry.clone().into()).expect("set"));
        assert!(store.has("kiln-test.pkl").expect("has"));
        assert_eq!(
            store.get("kiln-test.pkl", Candidate::Absent).expect("get"),
            Some(entry)
        );
        assert!(store.delete("kiln-test.pkl").expect("delete"));
        assert!(!store.set("kiln-test.pkl", Candidate::from("x")).expect("set"));
    }
}
