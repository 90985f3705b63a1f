//! Request classification for the fetch interception path.
//!
//! Every intercepted request is classified exactly once, before a fetch
//! strategy is chosen. Classification is total: any request maps to one of
//! the five [`RouteClass`] tags.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::manifest::REGISTRATION_SCRIPT;

/// Path prefixes that must always go to the network.
pub const NETWORK_ONLY_PREFIXES: &[&str] = &["/api/", "/genkit/"];

/// Exact paths that must always go to the network.
///
/// The registration script is listed so a stored copy can never pin an old
/// agent version.
pub const NETWORK_ONLY_PATHS: &[&str] = &[REGISTRATION_SCRIPT];

/// Path prefix of the versioned build output (scripts and styles).
pub const BUNDLE_PREFIX: &str = "/_next/";

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Image,
    Script,
    Style,
    Font,
    Manifest,
    #[default]
    #[serde(other)]
    Other,
}

/// An outbound request as seen by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: Url,
    #[serde(default)]
    pub accept: Option<String>,
    #[serde(default)]
    pub destination: Destination,
}

fn default_method() -> String {
    "GET".into()
}

impl AgentRequest {
    /// A plain `GET` with no `Accept` header.
    pub fn get(url: Url) -> Self {
        Self { method: default_method(), url, accept: None, destination: Destination::Other }
    }

    /// A `GET` for an HTML document.
    pub fn navigate(url: Url) -> Self {
        Self {
            method: default_method(),
            url,
            accept: Some("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".into()),
            destination: Destination::Document,
        }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Only `GET` is a cacheable, safe retrieval.
    pub fn is_read(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    pub fn accepts_html(&self) -> bool {
        self.accept.as_deref().is_some_and(|a| a.contains("text/html"))
    }
}

/// Categorical bucket assigned to a request before strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteClass {
    /// Always network; synthesized offline stub on failure.
    NetworkOnly,
    /// HTML documents; network first, store fallback, offline page last.
    Navigation,
    /// Versioned scripts and styles; network first, store fallback.
    Bundle,
    /// Images, icons, manifest; store first, refill on miss.
    Static,
    /// Not intercepted: another origin, or a method other than `GET`.
    CrossOrigin,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::NetworkOnly => "network-only",
            RouteClass::Navigation => "navigation",
            RouteClass::Bundle => "bundle",
            RouteClass::Static => "static",
            RouteClass::CrossOrigin => "cross-origin",
        }
    }
}

impl std::fmt::Display for RouteClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure classifier bound to one origin and the compiled-in route tables.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    origin: url::Origin,
    network_only: Vec<String>,
    network_only_paths: Vec<String>,
    bundle_prefix: String,
}

impl RouteClassifier {
    /// Classifier with the built-in network-only and bundle tables.
    pub fn new(origin: &Url) -> Self {
        Self::with_tables(origin, NETWORK_ONLY_PREFIXES, NETWORK_ONLY_PATHS, BUNDLE_PREFIX)
    }

    pub fn with_tables(
        origin: &Url, network_only: &[&str], network_only_paths: &[&str], bundle_prefix: &str,
    ) -> Self {
        Self {
            origin: origin.origin(),
            network_only: network_only.iter().map(|p| p.to_string()).collect(),
            network_only_paths: network_only_paths.iter().map(|p| p.to_string()).collect(),
            bundle_prefix: bundle_prefix.to_string(),
        }
    }

    pub fn classify(&self, request: &AgentRequest) -> RouteClass {
        if !request.is_read() {
            return RouteClass::CrossOrigin;
        }

        if request.url.origin() != self.origin {
            return RouteClass::CrossOrigin;
        }

        let path = request.url.path();
        if self.network_only_paths.iter().any(|exact| path == exact.as_str())
            || self.network_only.iter().any(|prefix| path.starts_with(prefix.as_str()))
        {
            return RouteClass::NetworkOnly;
        }

        if request.accepts_html() {
            return RouteClass::Navigation;
        }

        if path.starts_with(self.bundle_prefix.as_str()) {
            return RouteClass::Bundle;
        }

        RouteClass::Static
    }
}
