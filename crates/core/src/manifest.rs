//! Build-time asset manifest.

use serde::{Deserialize, Serialize};

/// Well-known path of the agent registration script.
pub const REGISTRATION_SCRIPT: &str = "/sw.js";

/// Document served when an HTML request misses both network and store.
pub const OFFLINE_DOCUMENT: &str = "/offline";

const REQUIRED_ASSETS: &[&str] = &[
    "/",
    OFFLINE_DOCUMENT,
    "/manifest.json",
    "/favicon.png",
    "/apple-touch-icon.png",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
];

const BEST_EFFORT_ASSETS: &[&str] = &["/check-in", "/mindfulness", "/games", "/progress", "/profile", "/settings"];

/// Assets an install must (or should) cache.
///
/// `required` entries are all-or-nothing; a single failure aborts the
/// install. `best_effort` entries are attempted individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub required: Vec<String>,
    #[serde(default)]
    pub best_effort: Vec<String>,
    #[serde(default = "default_offline_document")]
    pub offline_document: String,
}

fn default_offline_document() -> String {
    OFFLINE_DOCUMENT.into()
}

impl Manifest {
    /// The manifest compiled into this build.
    pub fn builtin() -> Self {
        Self {
            required: REQUIRED_ASSETS.iter().map(|s| s.to_string()).collect(),
            best_effort: BEST_EFFORT_ASSETS.iter().map(|s| s.to_string()).collect(),
            offline_document: default_offline_document(),
        }
    }

    pub fn new(required: &[&str], best_effort: &[&str]) -> Self {
        Self {
            required: required.iter().map(|s| s.to_string()).collect(),
            best_effort: best_effort.iter().map(|s| s.to_string()).collect(),
            offline_document: default_offline_document(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_requires_offline_document() {
        let manifest = Manifest::builtin();
        assert!(manifest.required.contains(&manifest.offline_document));
        assert_eq!(manifest.required[0], "/");
        assert_eq!(manifest.best_effort.len(), 6);
    }
}
