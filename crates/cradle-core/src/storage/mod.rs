//! Storage layer
//!
//! Everything Cradle persists lives in a flat key-value store. The
//! [`KeyValueStore`] trait is the only seam the sync engine sees, so any
//! backend (SQLite file, in-memory map) can hold the state.
//!
//! ## Layout
//!
//! - `trackz` - JSON event mapping (id -> event)
//! - `idToken`, `refreshToken`, `tokenExpiration` - credential set
//! - `familyKey` - household partition key
//! - `nextSyncToken` - incremental sync cursor
//! - `webSocketSession` - last realtime session id

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod state;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use state::{keys, LocalState, SharedState};

/// Narrow persistence interface
pub trait KeyValueStore {
    /// Read a value, `None` when the key was never written
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a single value
    fn set(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Write several values as one unit
    ///
    /// Backends that can must make this all-or-nothing.
    fn set_many(&mut self, entries: &[(&str, String)]) -> StorageResult<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Remove every key
    fn clear(&mut self) -> StorageResult<()>;
}
