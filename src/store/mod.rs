//! Durable key/value persistence for cached master data.
//!
//! Everything the engine keeps across restarts lives here: cache entries,
//! the global freshness marker, and the offline mutation queue. Consumers
//! read entries directly by their well-known keys (`master_site`,
//! `master_dept`, `cache_units`, ...), so those names are part of the
//! store's public surface.

mod storage;
mod traits;

pub use storage::{MemoryStore, SqliteStore};
pub use traits::PersistentStore;
