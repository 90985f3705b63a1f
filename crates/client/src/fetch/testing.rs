//! Scripted network fake.
//!
//! Responses are queued per path (including query). When a queue holds a
//! single item it is replayed for every later call, so one scripted response
//! serves any number of fetches.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Network;
use offgrid_core::{AgentRequest, CapturedResponse, Error};

#[derive(Debug, Clone)]
enum Scripted {
    Respond(CapturedResponse),
    Fail,
}

/// In-process [`Network`] with per-path scripted answers and call counting.
#[derive(Debug, Clone)]
pub struct ScriptedNetwork {
    routes: Arc<Mutex<HashMap<String, VecDeque<Scripted>>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    total: Arc<AtomicUsize>,
    online: Arc<AtomicBool>,
}

impl Default for ScriptedNetwork {
    fn default() -> Self {
        Self {
            routes: Arc::default(),
            calls: Arc::default(),
            total: Arc::default(),
            online: Arc::new(AtomicBool::new(true)),
        }
    }
}

fn route_key(url: &url::Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `path`.
    pub async fn respond(&self, path: &str, response: CapturedResponse) -> &Self {
        self.push(path, Scripted::Respond(response)).await;
        self
    }

    /// Queue a 200 with `body` for `path`.
    pub async fn respond_ok(&self, path: &str, body: &'static str) -> &Self {
        self.respond(path, CapturedResponse::new(200, vec![("Content-Type".into(), "text/html".into())], body))
            .await
    }

    /// Queue a 404 for `path`.
    pub async fn not_found(&self, path: &str) -> &Self {
        self.respond(path, CapturedResponse::new(404, vec![], "not found")).await
    }

    /// Queue a transport failure for `path`.
    pub async fn fail(&self, path: &str) -> &Self {
        self.push(path, Scripted::Fail).await;
        self
    }

    /// Drop everything scripted for `path`.
    pub async fn reset(&self, path: &str) {
        self.routes.lock().await.remove(path);
    }

    /// While offline every fetch fails regardless of the script.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Fetches seen for `path`, including ones that failed.
    pub async fn calls(&self, path: &str) -> usize {
        self.calls.lock().await.get(path).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    async fn push(&self, path: &str, scripted: Scripted) {
        self.routes.lock().await.entry(path.to_string()).or_default().push_back(scripted);
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &AgentRequest) -> Result<CapturedResponse, Error> {
        let key = route_key(&request.url);
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().await.entry(key.clone()).or_default() += 1;

        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::Network("offline".into()));
        }

        let next = {
            let mut routes = self.routes.lock().await;
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail) => Err(Error::Network(format!("scripted failure for {key}"))),
            None => Ok(CapturedResponse::new(404, vec![], "not found")),
        }
    }
}
