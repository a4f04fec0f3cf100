//! Incremental event sync
//!
//! Pulls event deltas from the REST gateway and folds them into the local
//! cache.
//!
//! ## Cycle
//!
//! 1. Read credentials, family key and cursor from local state
//! 2. Refresh the id token if it has expired
//! 3. Fetch events changed since the cursor
//! 4. Drop records that are not a known event kind
//! 5. Merge into the cached mapping (insert or overwrite, never remove)
//! 6. Persist mapping and cursor in one write
//!
//! ## Usage
//!
//! ```ignore
//! let engine = SyncEngine::new(gateway, state);
//! match engine.sync_once().await {
//!     SyncOutcome::Synced { total, .. } => println!("{} events", total),
//!     other => eprintln!("{:?}", other),
//! }
//! ```

mod engine;
mod merge;

pub use engine::{SyncEngine, SyncOutcome, SyncStatus};
pub use merge::{classify, merge, Classified};
