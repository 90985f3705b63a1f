//! Core types and shared functionality for offgrid.
//!
//! This crate provides:
//! - Versioned cache store with SQLite and in-memory backends
//! - Route classification for intercepted requests
//! - Cross-context message schema and client messenger
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod manifest;
pub mod message;
pub mod messenger;
pub mod response;
pub mod route;

pub use cache::{CacheDb, CacheStore, CacheVersion, MemoryStore, StoreEntry};
pub use config::AgentConfig;
pub use error::Error;
pub use manifest::Manifest;
pub use message::{AgentMessage, ClientMessage};
pub use messenger::{ClientHandle, ClientId, Messenger};
pub use response::CapturedResponse;
pub use route::{AgentRequest, Destination, RouteClass, RouteClassifier};
