//! Cache entries and the integrity digest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, CacheResult};

/// Compute the integrity digest of cached content (hex-encoded SHA-256).
pub fn digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// A cached evaluation result.
///
/// `hash` is expected to equal `digest(content)`; an entry where it does not is
/// corrupted. Fields are public so stores and audits can inspect and repair
/// them, but an entry taken out of a store is a copy: changing it has no effect
/// until it is stored again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Raw evaluator output (JSON text).
    pub content: String,
    /// Digest of `content` at the time the entry was written.
    pub hash: String,
    /// When the entry was created or last reconciled.
    pub timestamp: DateTime<Utc>,
}

impl Entry {
    /// Create an entry for freshly produced content, hashed and stamped now.
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let hash = digest(&content);
        Self {
            content,
            hash,
            timestamp: Utc::now(),
        }
    }

    /// Create an entry from stored parts without checking them.
    pub fn from_parts(
        content: impl Into<String>,
        hash: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            content: content.into(),
            hash: hash.into(),
            timestamp,
        }
    }

    /// Whether the stored hash still matches the content.
    pub fn is_valid(&self) -> bool {
        self.hash == digest(&self.content)
    }

    /// Whether the entry was written at or after `modified_at`.
    pub fn is_fresh_as_of(&self, modified_at: DateTime<Utc>) -> bool {
        self.timestamp >= modified_at
    }

    /// Build the replacement used when a hit turns out corrupted or stale:
    /// same content, recomputed hash, refreshed timestamp.
    pub fn reconciled(&self) -> Self {
        Self::new(self.content.clone())
    }
}

// ============================================================================
// CANDIDATES
// ============================================================================

/// A value offered to a cache store that is not statically known to be an
/// [`Entry`].
///
/// Store operations accept candidates so callers that forward loosely typed
/// data (decoded JSON, user input) get the contract's answers: a foreign
/// default is an error, a foreign value is a refused write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Candidate {
    /// No value.
    #[default]
    Absent,
    /// A real cache entry.
    Entry(Entry),
    /// Anything else; the payload describes what was offered.
    Foreign(String),
}

impl Candidate {
    /// Resolve a candidate used as a lookup default.
    ///
    /// Fails with [`CacheError::InvalidDefault`] for foreign values.
    pub fn into_default(self) -> CacheResult<Option<Entry>> {
        match self {
            Candidate::Absent => Ok(None),
            Candidate::Entry(entry) => Ok(Some(entry)),
            Candidate::Foreign(found) => Err(CacheError::InvalidDefault { found }),
        }
    }

    /// The entry, if this candidate holds one.
    pub fn into_entry(self) -> Option<Entry> {
        match self {
            Candidate::Entry(entry) => Some(entry),
            _ => None,
        }
    }
}

impl From<Entry> for Candidate {
    fn from(entry: Entry) -> Self {
        Candidate::Entry(entry)
    }
}

impl From<Option<Entry>> for Candidate {
    fn from(entry: Option<Entry>) -> Self {
        entry.map_or(Candidate::Absent, Candidate::Entry)
    }
}

impl From<&str> for Candidate {
    fn from(value: &str) -> Self {
        Candidate::Foreign(format!("string {:?}", value))
    }
}

impl From<String> for Candidate {
    fn from(value: String) -> Self {
        Candidate::from(value.as_str())
    }
}

impl From<serde_json::Value> for Candidate {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        let kind = match &value {
            Json::Null => return Candidate::Absent,
            Json::Bool(_) => "boolean",
            Json::Number(_) => "number",
            Json::String(_) => "string",
            Json::Array(_) => "array",
            Json::Object(_) => "object",
        };
        match serde_json::from_value::<Entry>(value) {
            Ok(entry) => Candidate::Entry(entry),
            Err(_) => Candidate::Foreign(kind.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_digest_is_stable_hex() {
        let d = digest("content");
        assert_eq!(d.len(), 64);
        assert_eq!(d, digest("content"));
        assert_ne!(d, digest("content "));
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_new_entry_is_valid() {
        let entry = Entry::new("{\"a\":1}");
        assert!(entry.is_valid());
        assert_eq!(entry.hash, digest("{\"a\":1}"));
    }

    #[test]
    fn test_from_parts_keeps_bad_hash() {
        let entry = Entry::from_parts("content", "hash", Utc::now());
        assert!(!entry.is_valid());
    }

    #[test]
    fn test_reconciled_repairs_hash_and_refreshes_timestamp() {
        let old = Utc.timestamp_opt(0, 0).single().expect("epoch is valid");
        let entry = Entry::from_parts("content", "invalid", old);
        let repaired = entry.reconciled();

        assert_eq!(repaired.content, "content");
        assert!(repaired.is_valid());
        assert!(repaired.timestamp > old);
        assert_ne!(repaired, entry);
    }

    #[test]
    fn test_freshness() {
        let t0 = Utc.timestamp_opt(100, 0).single().expect("valid");
        let t1 = Utc.timestamp_opt(200, 0).single().expect("valid");
        let entry = Entry::from_parts("c", digest("c"), t1);
        assert!(entry.is_fresh_as_of(t0));
        assert!(entry.is_fresh_as_of(t1));
        assert!(!Entry::from_parts("c", digest("c"), t0).is_fresh_as_of(t1));
    }

    #[test]
    fn test_candidate_default_resolution() {
        assert_eq!(Candidate::Absent.into_default(), Ok(None));

        let entry = Entry::new("x");
        assert_eq!(
            Candidate::from(entry.clone()).into_default(),
            Ok(Some(entry))
        );

        let err = Candidate::from("invalid")
            .into_default()
            .expect_err("foreign default must fail");
        assert!(matches!(err, CacheError::InvalidDefault { .. }));
    }

    #[test]
    fn test_candidate_from_json() {
        let entry = Entry::new("payload");
        let json = serde_json::to_value(&entry).expect("entry serializes");
        assert_eq!(Candidate::from(json), Candidate::Entry(entry));

        assert_eq!(Candidate::from(serde_json::Value::Null), Candidate::Absent);
        assert_eq!(
            Candidate::from(serde_json::json!({"content": "only"})),
            Candidate::Foreign("object".to_string())
        );
        assert_eq!(
            Candidate::from(serde_json::json!(42)),
            Candidate::Foreign("number".to_string())
        );
    }
}
