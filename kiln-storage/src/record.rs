//! On-disk format of the cache file.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! "KILN" | u16 version | u32 count | count x record
//! record = u32 len, key | u32 len, content | u32 len, hash | i64 secs | u32 nanos
//! ```
//!
//! Decoding only ever produces `(key, Entry)` tuples. Anything that does not
//! match the layout exactly, including trailing bytes, is rejected.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chrono::DateTime;
use kiln_core::{CacheError, CacheResult, Entry};
use tempfile::NamedTempFile;

/// File magic.
pub const MAGIC: &[u8; 4] = b"KILN";

/// Current format version.
pub const VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 4;

/// Encode a full store.
///
/// # Errors
///
/// [`CacheError::Format`] if the entry count or any string is too long for
/// its `u32` length prefix.
pub fn encode(entries: &BTreeMap<String, Entry>) -> CacheResult<Vec<u8>> {
    let body: usize = entries
        .iter()
        .map(|(k, e)| 12 + k.len() + e.content.len() + e.hash.len() + 12)
        .sum();
    let mut buf = Vec::with_capacity(HEADER_LEN + body);

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&length_prefix(entries.len(), "entry count")?.to_le_bytes());

    for (key, entry) in entries {
        put_str(&mut buf, key, "key")?;
        put_str(&mut buf, &entry.content, "content")?;
        put_str(&mut buf, &entry.hash, "hash")?;
        buf.extend_from_slice(&entry.timestamp.timestamp().to_le_bytes());
        buf.extend_from_slice(&entry.timestamp.timestamp_subsec_nanos().to_le_bytes());
    }

    Ok(buf)
}

fn length_prefix(len: usize, what: &str) -> CacheResult<u32> {
    u32::try_from(len).map_err(|_| format_error(format!("{what} of {len} exceeds u32::MAX")))
}

fn put_str(buf: &mut Vec<u8>, s: &str, what: &str) -> CacheResult<()> {
    buf.extend_from_slice(&length_prefix(s.len(), what)?.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Decode a full store.
///
/// # Errors
///
/// [`CacheError::Format`] on bad magic, unknown version, truncation,
/// trailing bytes, invalid UTF-8 or an out-of-range timestamp.
pub fn decode(bytes: &[u8]) -> CacheResult<BTreeMap<String, Entry>> {
    let mut reader = Reader { bytes, pos: 0 };

    if reader.take(4)? != MAGIC {
        return Err(format_error("bad magic"));
    }
    let version = u16::from_le_bytes(reader.array()?);
    if version != VERSION {
        return Err(format_error(format!("unsupported version {version}")));
    }
    let count = u32::from_le_bytes(reader.array()?);

    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = reader.string()?;
        let content = reader.string()?;
        let hash = reader.string()?;
        let secs = i64::from_le_bytes(reader.array()?);
        let nanos = u32::from_le_bytes(reader.array()?);
        let timestamp = DateTime::from_timestamp(secs, nanos)
            .ok_or_else(|| format_error(format!("timestamp out of range for {key:?}")))?;

        entries.insert(key, Entry::from_parts(content, hash, timestamp));
    }

    if reader.pos != bytes.len() {
        return Err(format_error(format!(
            "{} trailing bytes",
            bytes.len() - reader.pos
        )));
    }

    Ok(entries)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> CacheResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| format_error(format!("truncated at offset {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> CacheResult<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn string(&mut self) -> CacheResult<String> {
        let len = u32::from_le_bytes(self.array()?) as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|e| format_error(e.to_string()))
    }
}

fn format_error(reason: impl Into<String>) -> CacheError {
    CacheError::Format {
        reason: reason.into(),
    }
}

// ============================================================================
// FILE I/O
// ============================================================================

/// Read a store from `path`.
///
/// Returns `Ok(None)` when the file does not exist or is empty.
pub fn read_file(path: &Path) -> CacheResult<Option<BTreeMap<String, Entry>>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    decode(&bytes).map(Some)
}

/// Write a store to `path` through a temporary file renamed into place.
pub fn write_file(path: &Path, entries: &BTreeMap<String, Entry>) -> CacheResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let bytes = encode(entries)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
    tmp.write_all(&bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| io_error(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}

pub(crate) fn io_error(path: &Path, e: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kiln_core::digest;
    use tempfile::TempDir;

    fn sample() -> BTreeMap<String, Entry> {
        let ts = Utc
            .timestamp_opt(1_700_000_000, 123_456_789)
            .single()
            .expect("valid timestamp");
        let mut entries = BTreeMap::new();
        entries.insert(
            "config/app.pkl".to_string(),
            Entry::from_parts("{\"port\":8080}", digest("{\"port\":8080}"), ts),
        );
        entries.insert(
            "users.pkl".to_string(),
            Entry::from_parts("{\"name\":\"Zoë\"}", "not-a-digest", ts),
        );
        entries
    }

    #[test]
    fn test_round_trip_keeps_entries_verbatim() {
        let entries = sample();
        let decoded = decode(&encode(&entries).expect("encodes")).expect("decodes");
        assert_eq!(decoded, entries);
        // Decoding never repairs: the bad digest survives.
        assert!(!decoded["users.pkl"].is_valid());
    }

    #[test]
    fn test_empty_store() {
        let bytes = encode(&BTreeMap::new()).expect("encodes");
        assert_eq!(bytes.len(), HEADER_LEN);
        assert!(decode(&bytes).expect("decodes").is_empty());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = encode(&sample()).expect("encodes");
        bytes[0] = b'X';
        let err = decode(&bytes).expect_err("bad magic");
        assert!(matches!(err, CacheError::Format { ref reason } if reason.contains("magic")));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = encode(&sample()).expect("encodes");
        bytes[4] = 2;
        let err = decode(&bytes).expect_err("version 2");
        assert!(matches!(err, CacheError::Format { ref reason } if reason.contains("version")));
    }

    #[test]
    fn test_rejects_truncation_everywhere() {
        let bytes = encode(&sample()).expect("encodes");
        for len in 0..bytes.len() {
            assert!(
                decode(&bytes[..len]).is_err(),
                "prefix of {len} bytes should not decode"
            );
        }
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = encode(&sample()).expect("encodes");
        bytes.push(0);
        let err = decode(&bytes).expect_err("trailing byte");
        assert!(matches!(err, CacheError::Format { ref reason } if reason.contains("trailing")));
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let mut entries = BTreeMap::new();
        entries.insert("k".to_string(), Entry::new("x"));
        let mut bytes = encode(&entries).expect("encodes");
        // First key byte sits right after the header and its length prefix.
        bytes[HEADER_LEN + 4] = 0xFF;
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_length_prefix_rejects_oversized_values() {
        assert_eq!(length_prefix(7, "key").expect("fits"), 7);
        assert_eq!(
            length_prefix(u32::MAX as usize, "key").expect("fits"),
            u32::MAX
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_length_prefix_overflow_is_format_error() {
        let err = length_prefix(u32::MAX as usize + 1, "content").expect_err("too long");
        assert!(
            matches!(err, CacheError::Format { ref reason } if reason.contains("content")),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let path = dir.path().join(".kiln.cache");

        assert_eq!(read_file(&path).expect("missing is fine"), None);

        write_file(&path, &sample()).expect("write");
        assert_eq!(read_file(&path).expect("read"), Some(sample()));
    }

    #[test]
    fn test_empty_file_reads_as_no_store() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let path = dir.path().join("empty.cache");
        std::fs::write(&path, b"").expect("write");
        assert_eq!(read_file(&path).expect("read"), None);
    }

    #[test]
    fn test_garbage_file_is_format_error() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let path = dir.path().join("garbage.cache");
        std::fs::write(&path, b"a:1:{s:4:\"test\";}").expect("write");
        assert!(matches!(read_file(&path), Err(CacheError::Format { .. })));
    }
}
