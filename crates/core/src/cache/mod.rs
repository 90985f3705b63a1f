//! Versioned request → response stores.
//!
//! A store is named after the [`CacheVersion`] that created it. The agent
//! only ever reads and writes the store of its own version, so a newer
//! version installing alongside never corrupts what an older one serves.
//!
//! Two backends implement [`CacheStore`]:
//!
//! - [`CacheDb`]: SQLite via tokio-rusqlite, WAL mode, schema migrations
//! - [`MemoryStore`]: in-process maps, for tests and ephemeral runs

pub mod connection;
pub mod entries;
pub mod hash;
pub mod memory;
pub mod migrations;
pub mod store;

pub use crate::Error;

pub use connection::CacheDb;
pub use hash::entry_key;
pub use memory::MemoryStore;
pub use store::{CacheStore, CacheVersion, STORE_PREFIX, StoreEntry};
