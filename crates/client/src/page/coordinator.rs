//! Page-side update coordinator.
//!
//! One coordinator lives in each page instance. It registers the page with
//! the agent once, re-checks for a newer agent version on start and on a
//! fixed interval, exposes an "update available" flag, and reloads the page
//! exactly once when a new version reports that it has taken control.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

use offgrid_core::{AgentConfig, AgentMessage, CacheVersion, ClientHandle, ClientId, ClientMessage, Error};

/// Result of an explicit update check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate,
    /// A newer version installed and is waiting to take over.
    Waiting(CacheVersion),
    /// A newer version installed and took over immediately.
    Activated(CacheVersion),
}

/// The agent registration as seen from a page.
#[async_trait]
pub trait Registration: Send + Sync {
    /// Register `page` under the agent scope and open its message channel.
    async fn register(&self, page: Url) -> Result<ClientHandle, Error>;

    /// Look for a newer agent version, installing it if found.
    async fn check_for_update(&self) -> Result<UpdateStatus, Error>;

    async fn post_message(&self, from: ClientId, message: ClientMessage) -> Result<(), Error>;
}

/// The page the coordinator lives in.
pub trait PageHost: Send + Sync {
    /// Full reload, discarding in-memory state.
    fn reload(&self);
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Apply a waiting update as soon as it is found.
    pub auto_apply: bool,
    /// Interval between update checks.
    pub check_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { auto_apply: true, check_interval: Duration::from_secs(60 * 60) }
    }
}

impl From<&AgentConfig> for CoordinatorConfig {
    fn from(config: &AgentConfig) -> Self {
        Self { auto_apply: config.auto_apply_updates, check_interval: config.update_check_interval() }
    }
}

struct Inner {
    registration: Arc<dyn Registration>,
    host: Arc<dyn PageHost>,
    page: Url,
    config: CoordinatorConfig,
    client: Mutex<Option<ClientId>>,
    update_available: watch::Sender<bool>,
    reloaded: AtomicBool,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// Cloning shares the same coordinator.
#[derive(Clone)]
pub struct UpdateCoordinator {
    inner: Arc<Inner>,
}

impl UpdateCoordinator {
    pub fn new(
        registration: Arc<dyn Registration>, host: Arc<dyn PageHost>, page: Url, config: CoordinatorConfig,
    ) -> Self {
        let (update_available, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                registration,
                host,
                page,
                config,
                client: Mutex::new(None),
                update_available,
                reloaded: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Register with the agent and start watching for updates.
    ///
    /// Registers at most once; later calls return the existing client id.
    /// Returns `None` if registration failed.
    pub async fn start(&self) -> Option<ClientId> {
        let mut client = self.inner.client.lock().await;
        if let Some(id) = *client {
            return Some(id);
        }

        let handle = match self.inner.registration.register(self.inner.page.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(page = %self.inner.page, error = %e, "agent registration failed");
                return None;
            }
        };
        *client = Some(handle.id);
        drop(client);

        tracing::info!(page = %self.inner.page, client = %handle.id, "registered with agent");

        self.spawn_listener(handle.inbox);
        self.check_now().await;
        self.spawn_poller();

        Some(handle.id)
    }

    /// Run one update check.
    pub async fn check_now(&self) -> Option<UpdateStatus> {
        match self.inner.registration.check_for_update().await {
            Ok(status) => {
                if let UpdateStatus::Waiting(version) = status {
                    tracing::info!(%version, "update available");
                    self.inner.update_available.send_replace(true);
                    if self.inner.config.auto_apply {
                        self.apply_update().await;
                    }
                }
                Some(status)
            }
            Err(e) => {
                tracing::warn!(error = %e, "update check failed");
                None
            }
        }
    }

    /// Ask a waiting version to take over now.
    ///
    /// The reload happens when the new version reports it has taken control.
    /// Returns false if no update is waiting or the page is not registered.
    pub async fn apply_update(&self) -> bool {
        if !*self.inner.update_available.borrow() {
            return false;
        }
        let Some(id) = *self.inner.client.lock().await else {
            return false;
        };

        match self.inner.registration.post_message(id, ClientMessage::SkipWaiting).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(client = %id, error = %e, "failed to request skip waiting");
                false
            }
        }
    }

    pub fn update_available(&self) -> watch::Receiver<bool> {
        self.inner.update_available.subscribe()
    }

    pub fn has_reloaded(&self) -> bool {
        self.inner.reloaded.load(Ordering::SeqCst)
    }

    /// Stop the poller and listener and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    fn handle_agent_message(&self, message: AgentMessage) {
        match message {
            AgentMessage::SwUpdated => {
                if self.inner.reloaded.swap(true, Ordering::SeqCst) {
                    return;
                }
                tracing::info!(page = %self.inner.page, "new agent version took control, reloading");
                self.inner.update_available.send_replace(false);
                self.inner.host.reload();
            }
            AgentMessage::Unknown => {}
        }
    }

    fn spawn_listener(&self, mut inbox: mpsc::UnboundedReceiver<AgentMessage>) {
        let this = self.clone();
        self.inner.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = this.inner.cancel.cancelled() => break,
                    message = inbox.recv() => match message {
                        Some(message) => this.handle_agent_message(message),
                        None => break,
                    },
                }
            }
        });
    }

    fn spawn_poller(&self) {
        let this = self.clone();
        self.inner.tasks.spawn(async move {
            let mut interval = tokio::time::interval(this.inner.config.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = this.inner.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        this.check_now().await;
                    }
                }
            }
        });
    }
}
