//! One versioned agent and its event dispatch.
//!
//! Every event the host delivers goes through [`Agent::dispatch`], which
//! returns the [`Action`] the host should carry out.

use std::sync::Arc;

use offgrid_client::{Network, resolve};
use offgrid_core::{
    AgentRequest, CacheStore, CacheVersion, CapturedResponse, ClientId, ClientMessage, Error, Manifest, Messenger,
    RouteClass, RouteClassifier,
};
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use crate::lifecycle::{self, ActivationReport, Lifecycle, LifecycleState};
use crate::notification::{Notification, SYNC_CHECKINS, click_target};
use crate::strategy::{FetchEngine, Outcome};

/// Handles shared by every version under one scope.
#[derive(Clone)]
pub struct AgentContext {
    pub origin: Url,
    pub store: Arc<dyn CacheStore>,
    pub network: Arc<dyn Network>,
    pub messenger: Messenger,
    /// Activate right after install instead of waiting for pages to close.
    pub fast_takeover: bool,
    /// Largest body written to a store. Larger responses are still served.
    pub max_body_bytes: usize,
}

#[derive(Debug)]
pub enum AgentEvent {
    Install,
    Activate,
    Fetch(AgentRequest),
    Message { from: ClientId, message: ClientMessage },
    Sync { tag: String },
    Push { payload: Option<Value> },
    NotificationClick { data: Option<Value> },
}

/// Result of a background task the host must keep alive until it ends.
pub type Completion = Result<(), Error>;

#[derive(Debug)]
pub enum Action {
    RespondWith(CapturedResponse),
    /// Let the request reach the network untouched.
    Passthrough,
    /// Surface this error to the page as a failed fetch.
    Failed(Error),
    WaitUntil(Completion),
    /// Installed; activate without waiting.
    SkipWaiting,
    ShowNotification(Notification),
    FocusClient(ClientId),
    OpenWindow(String),
    Ignored,
}

pub struct Agent {
    context: AgentContext,
    version: CacheVersion,
    manifest: Manifest,
    classifier: RouteClassifier,
    engine: FetchEngine,
    lifecycle: Mutex<Lifecycle>,
}

impl Agent {
    /// A fresh version that still has to install.
    pub fn new(context: AgentContext, version: CacheVersion, manifest: Manifest) -> Result<Self, Error> {
        Self::with_lifecycle(context, manifest, Lifecycle::new(version))
    }

    /// A version whose complete store survived a restart.
    pub fn restored(context: AgentContext, version: CacheVersion, manifest: Manifest) -> Result<Self, Error> {
        Self::with_lifecycle(context, manifest, Lifecycle::restored(version))
    }

    fn with_lifecycle(context: AgentContext, manifest: Manifest, lifecycle: Lifecycle) -> Result<Self, Error> {
        let version = lifecycle.version();
        let offline_document =
            resolve(&context.origin, &manifest.offline_document).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let engine = FetchEngine::new(
            Arc::clone(&context.store),
            Arc::clone(&context.network),
            version.store_name(),
            context.origin.clone(),
            offline_document,
            context.max_body_bytes,
        );

        let classifier = RouteClassifier::new(&context.origin);

        Ok(Self { context, version, manifest, classifier, engine, lifecycle: Mutex::new(lifecycle) })
    }

    pub fn version(&self) -> CacheVersion {
        self.version
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.lock().await.state()
    }

    pub async fn dispatch(&self, event: AgentEvent) -> Action {
        match event {
            AgentEvent::Install => self.install().await,
            AgentEvent::Activate => Action::WaitUntil(self.activate().await.map(|_| ())),
            AgentEvent::Fetch(request) => self.fetch(request).await,
            AgentEvent::Message { from, message } => self.message(from, message).await,
            AgentEvent::Sync { tag } => self.sync(&tag),
            AgentEvent::Push { payload } => match Notification::from_push(payload) {
                Some(notification) => Action::ShowNotification(notification),
                None => {
                    tracing::debug!(version = %self.version, "ignoring push without a usable payload");
                    Action::Ignored
                }
            },
            AgentEvent::NotificationClick { data } => self.notification_click(data.as_ref()).await,
        }
    }

    /// Run activation and report what it did.
    pub async fn activate(&self) -> Result<ActivationReport, Error> {
        let mut lifecycle = self.lifecycle.lock().await;
        lifecycle.begin_activation()?;

        match lifecycle::activate(self.context.store.as_ref(), &self.context.messenger, self.version).await {
            Ok(report) => {
                lifecycle.activation_succeeded()?;
                Ok(report)
            }
            Err(e) => {
                tracing::error!(version = %self.version, error = %e, "activation failed");
                lifecycle.activation_failed()?;
                Err(e)
            }
        }
    }

    /// Mark this version superseded.
    pub async fn retire(&self) {
        self.lifecycle.lock().await.retire();
        tracing::info!(version = %self.version, "version is redundant");
    }

    /// Wait for background store writes.
    pub async fn settle(&self) {
        self.engine.settle().await;
    }

    async fn install(&self) -> Action {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state() != LifecycleState::Installing {
            return Action::WaitUntil(Err(Error::InvalidState {
                action: "install",
                state: lifecycle.state().to_string(),
            }));
        }

        tracing::info!(version = %self.version, "installing");
        let result = lifecycle::install(
            self.context.store.as_ref(),
            self.context.network.as_ref(),
            &self.context.origin,
            self.version,
            &self.manifest,
            self.context.max_body_bytes,
        )
        .await;

        match result {
            Ok(_) => match lifecycle.install_succeeded() {
                Ok(()) if self.context.fast_takeover => Action::SkipWaiting,
                Ok(()) => Action::WaitUntil(Ok(())),
                Err(e) => Action::WaitUntil(Err(e)),
            },
            Err(e) => {
                if let Err(state) = lifecycle.install_failed() {
                    tracing::error!(version = %self.version, error = %state, "lifecycle rejected install failure");
                }
                Action::WaitUntil(Err(e))
            }
        }
    }

    async fn fetch(&self, request: AgentRequest) -> Action {
        let class = self.classifier.classify(&request);
        tracing::debug!(version = %self.version, url = %request.url, class = %class, "fetch");

        match self.engine.handle(class, &request).await {
            Some(Outcome::Response { response, .. }) => Action::RespondWith(response),
            Some(Outcome::Failed(e)) => Action::Failed(e),
            None => {
                debug_assert_eq!(class, RouteClass::CrossOrigin);
                Action::Passthrough
            }
        }
    }

    async fn message(&self, from: ClientId, message: ClientMessage) -> Action {
        match message {
            ClientMessage::SkipWaiting => Action::SkipWaiting,
            ClientMessage::CacheUrls { urls } => {
                let report = self.engine.prime(&urls).await;
                tracing::info!(
                    client = %from,
                    cached = report.cached,
                    failed = report.failed.len(),
                    "primed requested URLs"
                );
                Action::WaitUntil(Ok(()))
            }
            ClientMessage::Unknown => {
                tracing::debug!(client = %from, "ignoring unknown message");
                Action::Ignored
            }
        }
    }

    fn sync(&self, tag: &str) -> Action {
        if tag == SYNC_CHECKINS {
            tracing::info!(version = %self.version, tag, "syncing check-ins");
            Action::WaitUntil(Ok(()))
        } else {
            tracing::debug!(tag, "ignoring unknown sync tag");
            Action::Ignored
        }
    }

    async fn notification_click(&self, data: Option<&Value>) -> Action {
        let target = click_target(data);
        let url = match resolve(&self.context.origin, target) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(url = %target, error = %e, "notification target is not openable");
                return Action::Ignored;
            }
        };

        let clients = self.context.messenger.clients().await;
        match clients.iter().find(|client| client.url == url) {
            Some(client) => Action::FocusClient(client.id),
            None => Action::OpenWindow(url.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offgrid_client::fetch::testing::ScriptedNetwork;
    use offgrid_core::{AgentMessage, Destination, MemoryStore};
    use serde_json::json;

    fn origin() -> Url {
        Url::parse("https://app.example").unwrap()
    }

    fn context(network: &ScriptedNetwork, store: &MemoryStore, fast_takeover: bool) -> AgentContext {
        AgentContext {
            origin: origin(),
            store: Arc::new(store.clone()),
            network: Arc::new(network.clone()),
            messenger: Messenger::new(),
            fast_takeover,
            max_body_bytes: 1 << 20,
        }
    }

    fn manifest() -> Manifest {
        Manifest::new(&["/", "/offline"], &[])
    }

    async fn installed(network: &ScriptedNetwork, store: &MemoryStore, fast_takeover: bool) -> (Agent, Action) {
        network.respond_ok("/", "home").await;
        network.respond_ok("/offline", "offline").await;
        let agent = Agent::new(context(network, store, fast_takeover), CacheVersion(1), manifest()).unwrap();
        let action = agent.dispatch(AgentEvent::Install).await;
        (agent, action)
    }

    #[tokio::test]
    async fn test_install_with_fast_takeover() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        let (agent, action) = installed(&network, &store, true).await;
        assert!(matches!(action, Action::SkipWaiting));
        assert_eq!(agent.state().await, LifecycleState::Installed);
    }

    #[tokio::test]
    async fn test_install_without_fast_takeover_waits() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        let (_, action) = installed(&network, &store, false).await;
        assert!(matches!(action, Action::WaitUntil(Ok(()))));
    }

    #[tokio::test]
    async fn test_failed_install_is_redundant() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        network.not_found("/offline").await;
        let agent = Agent::new(context(&network, &store, true), CacheVersion(1), manifest()).unwrap();

        let action = agent.dispatch(AgentEvent::Install).await;
        assert!(matches!(action, Action::WaitUntil(Err(Error::InstallFailed { .. }))));
        assert_eq!(agent.state().await, LifecycleState::Redundant);
        assert!(matches!(agent.dispatch(AgentEvent::Activate).await, Action::WaitUntil(Err(_))));
    }

    #[tokio::test]
    async fn test_install_after_failure_reports_state() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        network.not_found("/offline").await;
        let agent = Agent::new(context(&network, &store, true), CacheVersion(1), manifest()).unwrap();
        agent.dispatch(AgentEvent::Install).await;

        let again = agent.dispatch(AgentEvent::Install).await;
        assert!(matches!(again, Action::WaitUntil(Err(Error::InvalidState { action: "install", .. }))));
        assert_eq!(agent.state().await, LifecycleState::Redundant);
    }

    #[tokio::test]
    async fn test_large_page_is_served_but_not_stored() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        let mut context = context(&network, &store, true);
        context.max_body_bytes = 16;
        network.respond_ok("/", "home").await;
        network.respond_ok("/offline", "offline").await;
        let agent = Agent::new(context, CacheVersion(1), manifest()).unwrap();
        agent.dispatch(AgentEvent::Install).await;
        agent.dispatch(AgentEvent::Activate).await;

        network.respond_ok("/games", "a games page well over the limit").await;
        let page = AgentRequest::navigate(origin().join("/games").unwrap());
        match agent.dispatch(AgentEvent::Fetch(page)).await {
            Action::RespondWith(response) => assert_eq!(&response.body[..], b"a games page well over the limit"),
            other => panic!("unexpected action: {other:?}"),
        }
        agent.settle().await;
        assert_eq!(store.len("offgrid-v1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        let agent = Agent::new(context(&network, &store, true), CacheVersion(1), manifest()).unwrap();
        let action = agent.dispatch(AgentEvent::Activate).await;
        assert!(matches!(action, Action::WaitUntil(Err(Error::InvalidState { .. }))));
    }

    #[tokio::test]
    async fn test_fetch_dispatch_by_class() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        let (agent, _) = installed(&network, &store, true).await;
        agent.dispatch(AgentEvent::Activate).await;
        network.set_online(false);

        let page = AgentRequest::navigate(origin().join("/").unwrap());
        match agent.dispatch(AgentEvent::Fetch(page)).await {
            Action::RespondWith(response) => assert_eq!(&response.body[..], b"home"),
            other => panic!("unexpected action: {other:?}"),
        }

        let api = AgentRequest::get(origin().join("/api/chat").unwrap());
        match agent.dispatch(AgentEvent::Fetch(api)).await {
            Action::RespondWith(response) => assert_eq!(response, CapturedResponse::offline_stub()),
            other => panic!("unexpected action: {other:?}"),
        }

        let other = AgentRequest::get(Url::parse("https://fonts.example/a.css").unwrap());
        assert!(matches!(agent.dispatch(AgentEvent::Fetch(other)).await, Action::Passthrough));

        let script = AgentRequest::get(origin().join("/_next/static/new.js").unwrap()).with_destination(Destination::Script);
        assert!(matches!(agent.dispatch(AgentEvent::Fetch(script)).await, Action::Failed(_)));
    }

    #[tokio::test]
    async fn test_messages() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        let (agent, _) = installed(&network, &store, false).await;
        network.respond_ok("/games", "games").await;
        let from = ClientId(1);

        let skip = agent.dispatch(AgentEvent::Message { from, message: ClientMessage::SkipWaiting }).await;
        assert!(matches!(skip, Action::SkipWaiting));

        let prime = ClientMessage::CacheUrls { urls: vec!["/games".into()] };
        assert!(matches!(agent.dispatch(AgentEvent::Message { from, message: prime }).await, Action::WaitUntil(Ok(()))));
        // two assets, the build record and the primed page
        assert_eq!(store.len("offgrid-v1").await.unwrap(), 4);

        let unknown = agent.dispatch(AgentEvent::Message { from, message: ClientMessage::Unknown }).await;
        assert!(matches!(unknown, Action::Ignored));
    }

    #[tokio::test]
    async fn test_sync_and_push() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        let agent = Agent::new(context(&network, &store, true), CacheVersion(1), manifest()).unwrap();

        let sync = agent.dispatch(AgentEvent::Sync { tag: SYNC_CHECKINS.into() }).await;
        assert!(matches!(sync, Action::WaitUntil(Ok(()))));
        assert!(matches!(agent.dispatch(AgentEvent::Sync { tag: "other".into() }).await, Action::Ignored));

        let push = agent.dispatch(AgentEvent::Push { payload: Some(json!({"title": "Hi"})) }).await;
        assert!(matches!(push, Action::ShowNotification(n) if n.title == "Hi"));
        assert!(matches!(agent.dispatch(AgentEvent::Push { payload: None }).await, Action::Ignored));
    }

    #[tokio::test]
    async fn test_notification_click_focuses_or_opens() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        let context = context(&network, &store, true);
        let messenger = context.messenger.clone();
        let agent = Agent::new(context, CacheVersion(1), manifest()).unwrap();
        let page = messenger.connect(origin().join("/check-in").unwrap(), None).await;

        let focus = agent.dispatch(AgentEvent::NotificationClick { data: Some(json!({"url": "/check-in"})) }).await;
        assert!(matches!(focus, Action::FocusClient(id) if id == page.id));

        match agent.dispatch(AgentEvent::NotificationClick { data: None }).await {
            Action::OpenWindow(url) => assert_eq!(url, "https://app.example/"),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_activation_notifies_pages() {
        let (network, store) = (ScriptedNetwork::new(), MemoryStore::new());
        let context = context(&network, &store, true);
        let messenger = context.messenger.clone();
        network.respond_ok("/", "home").await;
        network.respond_ok("/offline", "offline").await;
        let agent = Agent::new(context, CacheVersion(3), manifest()).unwrap();
        let mut page = messenger.connect(origin(), None).await;

        agent.dispatch(AgentEvent::Install).await;
        let report = agent.activate().await.unwrap();
        assert_eq!(report.claimed, vec![page.id]);
        assert_eq!(page.inbox.recv().await, Some(AgentMessage::SwUpdated));
        assert_eq!(messenger.clients().await[0].controller, Some(CacheVersion(3)));
    }
}
