//! KILN Storage - Cache Stores
//!
//! Every backend implements the [`CacheStore`] contract:
//!
//! - [`FileStore`]: process-local map persisted as one versioned file
//! - [`PersistentCache`]: a file store that heals corrupted and stale entries
//!   on read and can be audited
//! - [`LmdbStore`]: memory-mapped environment shared by processes on one host
//! - [`NetworkStore`]: Redis database shared by several hosts

pub mod file_store;
pub mod lmdb_store;
pub mod network_store;
pub mod persistent;
pub mod record;
pub mod store;

pub use file_store::FileStore;
pub use lmdb_store::LmdbStore;
pub use network_store::NetworkStore;
pub use persistent::{PersistentCache, Violation, ViolationReason};
pub use store::{CacheStats, CacheStore};
