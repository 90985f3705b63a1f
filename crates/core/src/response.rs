//! Captured responses.
//!
//! A [`CapturedResponse`] is what the agent hands back for an intercepted
//! request and what a store entry holds. It is fully buffered and cheap to
//! clone (the body is reference-counted).

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Body of the network-only fallback.
pub const OFFLINE_ERROR_MESSAGE: &str = "You are offline";

const PLACEHOLDER_SVG: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"100\" height=\"100\">\
<rect fill=\"#f0f0f0\" width=\"100\" height=\"100\"/></svg>";

/// A buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default, serialize_with = "encode_body", deserialize_with = "decode_body")]
    pub body: Bytes,
}

impl CapturedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self { status, headers, body: body.into() }
    }

    /// Status in the 200-299 range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Structured 503 returned when a network-only request cannot reach the network.
    pub fn offline_stub() -> Self {
        let body = serde_json::json!({ "error": OFFLINE_ERROR_MESSAGE }).to_string();
        Self::new(503, vec![("Content-Type".into(), "application/json".into())], body)
    }

    /// Plain 503 used when the offline document itself is not stored.
    pub fn offline_text() -> Self {
        Self::new(503, vec![("Content-Type".into(), "text/plain".into())], "Offline")
    }

    /// Neutral inline image served in place of an unreachable one.
    pub fn placeholder_image() -> Self {
        Self::new(200, vec![("Content-Type".into(), "image/svg+xml".into())], PLACEHOLDER_SVG)
    }
}

fn encode_body<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(body))
}

fn decode_body<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}
