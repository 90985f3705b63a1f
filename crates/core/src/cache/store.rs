//! Store abstraction shared by every backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::hash::entry_key;
use crate::Error;
use crate::response::CapturedResponse;

/// Prefix of every store name this agent owns.
pub const STORE_PREFIX: &str = "offgrid-v";

/// Monotonically increasing version embedded in a store name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheVersion(pub u32);

impl CacheVersion {
    pub fn store_name(&self) -> String {
        format!("{STORE_PREFIX}{}", self.0)
    }

    /// Parse a store name produced by [`CacheVersion::store_name`].
    pub fn from_store_name(name: &str) -> Option<Self> {
        name.strip_prefix(STORE_PREFIX)?.parse().ok().map(CacheVersion)
    }
}

impl std::fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One captured request → response pair.
///
/// Entries are never updated in place; a refill writes a whole new entry
/// under the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub key: String,
    pub method: String,
    pub url: String,
    pub response: CapturedResponse,
    pub written_at: DateTime<Utc>,
}

impl StoreEntry {
    /// Capture `response` for a request, stamped with the current time.
    pub fn capture(method: &str, url: &Url, response: CapturedResponse) -> Self {
        Self {
            key: entry_key(method, url),
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            response,
            written_at: Utc::now(),
        }
    }

    /// An entry under a fixed key that no request hashes to.
    pub fn record(key: &str, response: CapturedResponse) -> Self {
        Self {
            key: key.to_string(),
            method: "GET".into(),
            url: key.to_string(),
            response,
            written_at: Utc::now(),
        }
    }
}

/// Named collection of versioned stores.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create an empty store. Returns false if it already existed.
    async fn create(&self, name: &str) -> Result<bool, Error>;

    async fn has(&self, name: &str) -> Result<bool, Error>;

    /// Every existing store name.
    async fn names(&self) -> Result<Vec<String>, Error>;

    /// Delete a store and all of its entries. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, Error>;

    /// Delete every store except `keep`, all or nothing.
    ///
    /// Returns the deleted names in name order. On error no store is removed.
    async fn delete_except(&self, keep: &str) -> Result<Vec<String>, Error>;

    async fn get(&self, name: &str, key: &str) -> Result<Option<StoreEntry>, Error>;

    /// Write an entry, replacing any entry with the same key.
    ///
    /// Fails with [`Error::StoreMissing`] if the store does not exist.
    async fn put(&self, name: &str, entry: StoreEntry) -> Result<(), Error>;

    /// Number of entries in a store.
    async fn len(&self, name: &str) -> Result<usize, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_name_round_trip() {
        let version = CacheVersion(4);
        assert_eq!(version.store_name(), "offgrid-v4");
        assert_eq!(CacheVersion::from_store_name("offgrid-v4"), Some(version));
    }

    #[test]
    fn test_foreign_store_names() {
        assert_eq!(CacheVersion::from_store_name("other-v4"), None);
        assert_eq!(CacheVersion::from_store_name("offgrid-vx"), None);
        assert_eq!(CacheVersion::from_store_name("offgrid-v"), None);
    }

    #[test]
    fn test_capture_normalizes_method() {
        let url = Url::parse("https://app.example/favicon.png").unwrap();
        let entry = StoreEntry::capture("get", &url, CapturedResponse::new(200, vec![], "png"));
        assert_eq!(entry.method, "GET");
        assert_eq!(entry.key, entry_key("GET", &url));
    }
}
