//! Cradle Core Library
//!
//! This crate provides the core functionality for Cradle, a command-line
//! client for a baby-care tracking backend: feeds, naps, diapers, pumping
//! and routines logged by the family are synced into a local cache and
//! summarized from there.
//!
//! # Architecture
//!
//! - **Realtime channel**: websocket used once at login to negotiate the
//!   family key
//! - **REST gateway**: password login, token refresh and incremental sync
//! - **Local state**: SQLite key-value store holding tokens, cursor and the
//!   cached events
//!
//! All queries are served from the local cache; only `sync` talks to the
//! backend.
//!
//! # Quick Start
//!
//! ```text
//! let state = LocalState::new(SqliteStore::open(&config.store_path())?).shared();
//! let engine = SyncEngine::new(HttpGateway::from_config(&config)?, state.clone());
//! engine.sync_once().await;
//!
//! let trackz = LocalState::lock(&state)?.trackz()?;
//! let last_feed = queries::last_event_by_kind(&trackz, EventKind::Feed);
//! ```
//!
//! # Modules
//!
//! - `channel`: Websocket duplex channel with a timed inbound queue
//! - `protocol`: Realtime wire frames
//! - `negotiator`: Handshake, auth and family key negotiation
//! - `gateway`: REST endpoints
//! - `session`: Login and logout
//! - `sync`: Incremental sync engine
//! - `storage`: Key-value persistence and typed local state
//! - `queries`: Read operations over cached events
//! - `models`: Event records and credentials
//! - `config`: Application configuration

pub mod channel;
pub mod config;
pub mod gateway;
pub mod models;
pub mod negotiator;
pub mod protocol;
pub mod queries;
pub mod session;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

pub use channel::{ChannelEndpoint, ChannelError, DuplexChannel, WsChannel};
pub use config::Config;
pub use gateway::{Gateway, GatewayError, HttpGateway};
pub use models::{Credentials, EventKind, TrackedEvent, Trackz};
pub use negotiator::{NegotiationError, Negotiator};
pub use session::{LoggedIn, Session, SessionError, SessionStatus};
pub use storage::{KeyValueStore, LocalState, SharedState, SqliteStore, StorageError};
pub use sync::{SyncEngine, SyncOutcome, SyncStatus};
