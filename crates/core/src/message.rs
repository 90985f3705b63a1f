//! Cross-context message schema.
//!
//! Messages are JSON objects tagged on `type`. Unknown types decode to an
//! `Unknown` variant so receivers can ignore them instead of failing.

use serde::{Deserialize, Serialize};

/// Page → agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate a waiting install now instead of waiting for every page to close.
    SkipWaiting,
    /// Prime these URLs into the current store.
    CacheUrls { urls: Vec<String> },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Decode a message payload.
    ///
    /// Anything that is not an object with a known `type` decodes to
    /// `Unknown`; this never fails.
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or(ClientMessage::Unknown)
    }
}

/// Agent → page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    /// A new version has taken control; the page should reload.
    SwUpdated,
    #[serde(other)]
    Unknown,
}
