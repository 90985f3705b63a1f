//! Fetch strategies.
//!
//! Each intercepted route class maps to one strategy:
//!
//! | class          | strategy                          |
//! |----------------|-----------------------------------|
//! | network-only   | network, offline stub on failure  |
//! | navigation     | network first, store, offline doc |
//! | bundle         | network first, store, fail        |
//! | static         | store first, refill from network  |
//!
//! Store writes after a successful network response run as background tasks
//! on a [`TaskTracker`]. The response is returned without waiting for them and
//! a failed write is only logged. Responses larger than the capture limit
//! are served but never stored.

use std::sync::Arc;

use offgrid_client::{Network, resolve};
use offgrid_core::cache::entry_key;
use offgrid_core::{AgentRequest, CacheStore, CapturedResponse, Destination, Error, RouteClass, StoreEntry};
use tokio_util::task::TaskTracker;
use url::Url;

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Network,
    Store,
    Synthesized,
}

/// Result of running a strategy.
#[derive(Debug)]
pub enum Outcome {
    Response { response: CapturedResponse, source: Source },
    /// No safe substitute exists; the network error is surfaced to the page.
    Failed(Error),
}

impl Outcome {
    fn network(response: CapturedResponse) -> Self {
        Outcome::Response { response, source: Source::Network }
    }

    fn store(response: CapturedResponse) -> Self {
        Outcome::Response { response, source: Source::Store }
    }

    fn synthesized(response: CapturedResponse) -> Self {
        Outcome::Response { response, source: Source::Synthesized }
    }

    pub fn response(&self) -> Option<&CapturedResponse> {
        match self {
            Outcome::Response { response, .. } => Some(response),
            Outcome::Failed(_) => None,
        }
    }

    pub fn source(&self) -> Option<Source> {
        match self {
            Outcome::Response { source, .. } => Some(*source),
            Outcome::Failed(_) => None,
        }
    }
}

/// What a network-first strategy falls back to after a store miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    OfflineDocument,
    Fail,
}

/// Tally of a bulk prime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimeReport {
    pub cached: usize,
    pub failed: Vec<String>,
}

/// Strategy runner bound to one versioned store.
pub struct FetchEngine {
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    store_name: String,
    origin: Url,
    offline_document: Url,
    capture_limit: usize,
    writes: TaskTracker,
}

impl FetchEngine {
    pub fn new(
        store: Arc<dyn CacheStore>, network: Arc<dyn Network>, store_name: String, origin: Url, offline_document: Url,
        capture_limit: usize,
    ) -> Self {
        Self { store, network, store_name, origin, offline_document, capture_limit, writes: TaskTracker::new() }
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Run the strategy for `class`. Returns `None` for requests that are not intercepted.
    pub async fn handle(&self, class: RouteClass, request: &AgentRequest) -> Option<Outcome> {
        let outcome = match class {
            RouteClass::CrossOrigin => return None,
            RouteClass::NetworkOnly => self.network_only(request).await,
            RouteClass::Navigation => self.network_first(request, Fallback::OfflineDocument).await,
            RouteClass::Bundle => self.network_first(request, Fallback::Fail).await,
            RouteClass::Static => self.cache_first(request).await,
        };
        Some(outcome)
    }

    pub async fn network_only(&self, request: &AgentRequest) -> Outcome {
        match self.network.fetch(request).await {
            Ok(response) => Outcome::network(response),
            Err(e) => {
                tracing::info!(url = %request.url, error = %e, "network-only request failed, serving offline stub");
                Outcome::synthesized(CapturedResponse::offline_stub())
            }
        }
    }

    pub async fn network_first(&self, request: &AgentRequest, fallback: Fallback) -> Outcome {
        let error = match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.refill(request, response.clone());
                }
                return Outcome::network(response);
            }
            Err(e) => e,
        };

        if let Some(stored) = self.lookup(&request.method, &request.url).await {
            tracing::debug!(url = %request.url, "network failed, serving stored copy");
            return Outcome::store(stored);
        }

        match fallback {
            Fallback::OfflineDocument => match self.lookup("GET", &self.offline_document).await {
                Some(document) => Outcome::store(document),
                None => Outcome::synthesized(CapturedResponse::offline_text()),
            },
            Fallback::Fail => Outcome::Failed(error),
        }
    }

    pub async fn cache_first(&self, request: &AgentRequest) -> Outcome {
        if let Some(stored) = self.lookup(&request.method, &request.url).await {
            return Outcome::store(stored);
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.refill(request, response.clone());
                }
                Outcome::network(response)
            }
            Err(e) if request.destination == Destination::Image => {
                tracing::debug!(url = %request.url, error = %e, "image unavailable, serving placeholder");
                Outcome::synthesized(CapturedResponse::placeholder_image())
            }
            Err(e) => Outcome::Failed(e),
        }
    }

    /// Fetch `urls` into the store, awaiting each write.
    ///
    /// Failures are logged and skipped.
    pub async fn prime(&self, urls: &[String]) -> PrimeReport {
        let mut report = PrimeReport::default();

        for raw in urls {
            let url = match resolve(&self.origin, raw) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(url = %raw, error = %e, "skipping URL that cannot be primed");
                    report.failed.push(raw.clone());
                    continue;
                }
            };

            let request = AgentRequest::get(url);
            let result = match self.network.fetch(&request).await {
                Ok(response) if response.body.len() > self.capture_limit => Err(Error::TooLarge {
                    url: request.url.to_string(),
                    bytes: response.body.len(),
                    limit: self.capture_limit,
                }),
                Ok(response) if response.is_ok() => {
                    let entry = StoreEntry::capture(&request.method, &request.url, response);
                    self.store.put(&self.store_name, entry).await
                }
                Ok(response) => Err(Error::HttpStatus(response.status)),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => report.cached += 1,
                Err(e) => {
                    tracing::warn!(url = %request.url, error = %e, "failed to prime URL");
                    report.failed.push(raw.clone());
                }
            }
        }

        report
    }

    /// Wait until every background write started so far has finished.
    pub async fn settle(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Stored response for a request, treating read errors as misses.
    async fn lookup(&self, method: &str, url: &Url) -> Option<CapturedResponse> {
        let key = entry_key(method, url);
        match self.store.get(&self.store_name, &key).await {
            Ok(entry) => entry.map(|e| e.response),
            Err(e) => {
                tracing::warn!(store = %self.store_name, %url, error = %e, "store read failed, treating as miss");
                None
            }
        }
    }

    fn refill(&self, request: &AgentRequest, response: CapturedResponse) {
        if response.body.len() > self.capture_limit {
            tracing::debug!(
                url = %request.url,
                bytes = response.body.len(),
                limit = self.capture_limit,
                "response too large to store"
            );
            return;
        }
        let entry = StoreEntry::capture(&request.method, &request.url, response);
        let store = Arc::clone(&self.store);
        let store_name = self.store_name.clone();

        self.writes.spawn(async move {
            let url = entry.url.clone();
            if let Err(e) = store.put(&store_name, entry).await {
                tracing::warn!(store = %store_name, %url, error = %e, "background store write failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offgrid_client::fetch::testing::ScriptedNetwork;
    use offgrid_core::MemoryStore;

    const STORE: &str = "offgrid-v1";

    fn origin() -> Url {
        Url::parse("https://app.example").unwrap()
    }

    fn at(path: &str) -> Url {
        origin().join(path).unwrap()
    }

    async fn engine(network: &ScriptedNetwork) -> (FetchEngine, MemoryStore) {
        limited_engine(network, 1 << 20).await
    }

    async fn limited_engine(network: &ScriptedNetwork, capture_limit: usize) -> (FetchEngine, MemoryStore) {
        let store = MemoryStore::new();
        store.create(STORE).await.unwrap();
        let engine = FetchEngine::new(
            Arc::new(store.clone()),
            Arc::new(network.clone()),
            STORE.to_string(),
            origin(),
            at("/offline"),
            capture_limit,
        );
        (engine, store)
    }

    fn body(outcome: &Outcome) -> &[u8] {
        &outcome.response().unwrap().body[..]
    }

    #[tokio::test]
    async fn test_network_only_passes_response_through() {
        let network = ScriptedNetwork::new();
        network.respond("/api/chat", CapturedResponse::new(500, vec![], "boom")).await;
        let (engine, store) = engine(&network).await;

        let outcome = engine.network_only(&AgentRequest::get(at("/api/chat"))).await;
        assert_eq!(outcome.response().unwrap().status, 500);
        assert_eq!(outcome.source(), Some(Source::Network));

        engine.settle().await;
        assert_eq!(store.len(STORE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_network_only_offline_stub() {
        let network = ScriptedNetwork::new();
        network.set_online(false);
        let (engine, _) = engine(&network).await;

        let outcome = engine.network_only(&AgentRequest::get(at("/api/analyze"))).await;
        let response = outcome.response().unwrap();
        assert!((500..600).contains(&response.status));
        assert_eq!(response.content_type(), Some("application/json"));
        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(json.get("error").is_some());
        assert_eq!(outcome.source(), Some(Source::Synthesized));
    }

    #[tokio::test]
    async fn test_network_first_freshness() {
        let network = ScriptedNetwork::new();
        network.respond_ok("/games", "A").await.respond_ok("/games", "B").await;
        let (engine, _) = engine(&network).await;
        let request = AgentRequest::navigate(at("/games"));

        assert_eq!(body(&engine.network_first(&request, Fallback::OfflineDocument).await), b"A");
        engine.settle().await;
        assert_eq!(body(&engine.network_first(&request, Fallback::OfflineDocument).await), b"B");
        engine.settle().await;

        network.set_online(false);
        let offline = engine.network_first(&request, Fallback::OfflineDocument).await;
        assert_eq!(body(&offline), b"B");
        assert_eq!(offline.source(), Some(Source::Store));
    }

    #[tokio::test]
    async fn test_network_first_does_not_store_errors() {
        let network = ScriptedNetwork::new();
        network.respond_ok("/progress", "good").await;
        network.respond("/progress", CapturedResponse::new(502, vec![], "bad gateway")).await;
        let (engine, _) = engine(&network).await;
        let request = AgentRequest::navigate(at("/progress"));

        engine.network_first(&request, Fallback::OfflineDocument).await;
        let second = engine.network_first(&request, Fallback::OfflineDocument).await;
        assert_eq!(second.response().unwrap().status, 502);
        engine.settle().await;

        network.set_online(false);
        assert_eq!(body(&engine.network_first(&request, Fallback::OfflineDocument).await), b"good");
    }

    #[tokio::test]
    async fn test_navigation_falls_back_to_offline_document() {
        let network = ScriptedNetwork::new();
        let (engine, store) = engine(&network).await;
        let offline = CapturedResponse::new(200, vec![], "<h1>You are offline</h1>");
        store.put(STORE, StoreEntry::capture("GET", &at("/offline"), offline.clone())).await.unwrap();
        network.set_online(false);

        let outcome = engine.network_first(&AgentRequest::navigate(at("/never-visited")), Fallback::OfflineDocument).await;
        assert_eq!(outcome.response(), Some(&offline));
    }

    #[tokio::test]
    async fn test_navigation_without_offline_document() {
        let network = ScriptedNetwork::new();
        network.set_online(false);
        let (engine, _) = engine(&network).await;

        let outcome = engine.network_first(&AgentRequest::navigate(at("/settings")), Fallback::OfflineDocument).await;
        assert_eq!(outcome.response(), Some(&CapturedResponse::offline_text()));
    }

    #[tokio::test]
    async fn test_bundle_failure_propagates() {
        let network = ScriptedNetwork::new();
        network.fail("/_next/static/chunks/app.js").await;
        let (engine, _) = engine(&network).await;

        let request = AgentRequest::get(at("/_next/static/chunks/app.js")).with_destination(Destination::Script);
        let outcome = engine.handle(RouteClass::Bundle, &request).await.unwrap();
        assert!(matches!(outcome, Outcome::Failed(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_cache_first_idempotence() {
        let network = ScriptedNetwork::new();
        network.respond("/icons/icon-512x512.png", CapturedResponse::new(200, vec![], vec![1u8, 2, 3])).await;
        let (engine, _) = engine(&network).await;
        let request = AgentRequest::get(at("/icons/icon-512x512.png")).with_destination(Destination::Image);

        let first = engine.cache_first(&request).await;
        engine.settle().await;
        network.set_online(false);
        let second = engine.cache_first(&request).await;

        assert_eq!(body(&first), body(&second));
        assert_eq!(second.source(), Some(Source::Store));
        assert_eq!(network.calls("/icons/icon-512x512.png").await, 1);
    }

    #[tokio::test]
    async fn test_cache_first_image_placeholder() {
        let network = ScriptedNetwork::new();
        network.set_online(false);
        let (engine, _) = engine(&network).await;

        let image = AgentRequest::get(at("/avatars/me.png")).with_destination(Destination::Image);
        let outcome = engine.cache_first(&image).await;
        assert_eq!(outcome.response(), Some(&CapturedResponse::placeholder_image()));

        let font = AgentRequest::get(at("/fonts/inter.woff2")).with_destination(Destination::Font);
        assert!(matches!(engine.cache_first(&font).await, Outcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_write_failure_does_not_fail_response() {
        let network = ScriptedNetwork::new();
        network.respond_ok("/manifest.json", "{}").await;
        let (engine, store) = engine(&network).await;
        store.delete(STORE).await.unwrap();

        let outcome = engine.cache_first(&AgentRequest::get(at("/manifest.json"))).await;
        assert_eq!(body(&outcome), b"{}");
        engine.settle().await;
    }

    #[tokio::test]
    async fn test_cross_origin_is_not_handled() {
        let network = ScriptedNetwork::new();
        let (engine, _) = engine(&network).await;
        let request = AgentRequest::get(Url::parse("https://cdn.example/x.js").unwrap());
        assert!(engine.handle(RouteClass::CrossOrigin, &request).await.is_none());
        assert_eq!(network.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_prime_skips_failures() {
        let network = ScriptedNetwork::new();
        network.respond_ok("/games", "games").await;
        network.not_found("/gone").await;
        let (engine, store) = engine(&network).await;

        let urls = vec!["/games".to_string(), "/gone".to_string(), "https://cdn.example/x".to_string()];
        let report = engine.prime(&urls).await;

        assert_eq!(report.cached, 1);
        assert_eq!(report.failed, vec!["/gone".to_string(), "https://cdn.example/x".to_string()]);
        assert_eq!(store.len(STORE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_large_network_only_response_passes_through() {
        let network = ScriptedNetwork::new();
        network.respond("/api/export", CapturedResponse::new(201, vec![], "a large export body")).await;
        let (engine, _) = limited_engine(&network, 4).await;

        let outcome = engine.network_only(&AgentRequest::get(at("/api/export"))).await;
        assert_eq!(outcome.response().unwrap().status, 201);
        assert_eq!(body(&outcome), b"a large export body");
        assert_eq!(outcome.source(), Some(Source::Network));
    }

    #[tokio::test]
    async fn test_large_static_response_is_served_not_stored() {
        let network = ScriptedNetwork::new();
        network.respond_ok("/fonts/inter.woff2", "font bytes").await;
        let (engine, store) = limited_engine(&network, 4).await;
        let font = AgentRequest::get(at("/fonts/inter.woff2")).with_destination(Destination::Font);

        assert_eq!(body(&engine.cache_first(&font).await), b"font bytes");
        engine.settle().await;
        assert_eq!(store.len(STORE).await.unwrap(), 0);

        network.set_online(false);
        assert!(matches!(engine.cache_first(&font).await, Outcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_large_navigation_is_served_not_stored() {
        let network = ScriptedNetwork::new();
        network.respond_ok("/games", "a long games page").await;
        let (engine, _) = limited_engine(&network, 4).await;
        let request = AgentRequest::navigate(at("/games"));

        let online = engine.network_first(&request, Fallback::OfflineDocument).await;
        assert_eq!(body(&online), b"a long games page");
        engine.settle().await;

        network.set_online(false);
        let offline = engine.network_first(&request, Fallback::OfflineDocument).await;
        assert_eq!(offline.response(), Some(&CapturedResponse::offline_text()));
    }

    #[tokio::test]
    async fn test_prime_rejects_oversized_body() {
        let network = ScriptedNetwork::new();
        network.respond_ok("/a", "ok").await;
        network.respond_ok("/games", "too big to keep").await;
        let (engine, store) = limited_engine(&network, 4).await;

        let report = engine.prime(&["/a".to_string(), "/games".to_string()]).await;
        assert_eq!(report.cached, 1);
        assert_eq!(report.failed, vec!["/games".to_string()]);
        assert_eq!(store.len(STORE).await.unwrap(), 1);
    }
}
