//! CLI command implementations

pub mod config;
pub mod events;
pub mod session;
pub mod status;
pub mod summary;
pub mod sync;
