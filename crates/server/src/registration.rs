//! Registration for one origin: the active and waiting version slots.
//!
//! At most one version is active (handles fetches) and at most one is
//! waiting (installed, not yet in control). A newer build installs into the
//! waiting slot; with fast takeover, or when no page is open, it activates
//! straight away.

use std::sync::Arc;

use async_trait::async_trait;
use offgrid_client::{Registration, UpdateStatus};
use offgrid_core::{AgentRequest, CacheVersion, ClientHandle, ClientId, ClientMessage, Error, Manifest};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::agent::{Action, Agent, AgentContext, AgentEvent};
use crate::lifecycle;

/// Version compiled into this binary.
pub const BUILTIN_VERSION: CacheVersion = CacheVersion(1);

/// A deployable agent version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBuild {
    pub version: CacheVersion,
    #[serde(default = "Manifest::builtin")]
    pub manifest: Manifest,
}

impl AgentBuild {
    pub fn new(version: CacheVersion, manifest: Manifest) -> Self {
        Self { version, manifest }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_VERSION, Manifest::builtin())
    }
}

pub struct AgentRegistration {
    context: AgentContext,
    /// Most recently published build, picked up by the next update check.
    latest: RwLock<Option<AgentBuild>>,
    active: RwLock<Option<Arc<Agent>>>,
    waiting: Mutex<Option<Arc<Agent>>>,
    /// Serializes installs and activations.
    updates: Mutex<()>,
}

impl AgentRegistration {
    pub fn new(context: AgentContext) -> Self {
        Self {
            context,
            latest: RwLock::new(None),
            active: RwLock::new(None),
            waiting: Mutex::new(None),
            updates: Mutex::new(()),
        }
    }

    pub fn origin(&self) -> &Url {
        &self.context.origin
    }

    pub async fn active_version(&self) -> Option<CacheVersion> {
        self.active.read().await.as_ref().map(|agent| agent.version())
    }

    pub async fn waiting_version(&self) -> Option<CacheVersion> {
        self.waiting.lock().await.as_ref().map(|agent| agent.version())
    }

    /// Make `build` the one the next update check installs.
    pub async fn publish(&self, build: AgentBuild) {
        tracing::info!(version = %build.version, "build published");
        *self.latest.write().await = Some(build);
    }

    /// Resume from persisted state at startup.
    ///
    /// The newest store holding a finished install at or above `build`'s
    /// version becomes the active version without refetching, so a restart
    /// never rolls back a version installed at runtime. Anything else goes
    /// through a normal install of `build`.
    pub async fn restore(&self, build: AgentBuild) -> Result<UpdateStatus, Error> {
        let Some((version, manifest)) = self.newest_installed(&build).await? else {
            return self.update(build).await;
        };

        let _guard = self.updates.lock().await;
        let agent = Arc::new(Agent::restored(self.context.clone(), version, manifest)?);
        if version > build.version {
            tracing::info!(version = %version, builtin = %build.version, "keeping newer installed version");
        }
        tracing::info!(version = %version, "restored active version from store");
        *self.active.write().await = Some(agent);
        Ok(UpdateStatus::UpToDate)
    }

    /// Newest finished install that `build` must not replace.
    ///
    /// A store for `build`'s own version only counts if it was installed from
    /// the same manifest.
    async fn newest_installed(&self, build: &AgentBuild) -> Result<Option<(CacheVersion, Manifest)>, Error> {
        let store = self.context.store.as_ref();
        let mut versions: Vec<CacheVersion> = store
            .names()
            .await?
            .iter()
            .filter_map(|name| CacheVersion::from_store_name(name))
            .filter(|version| *version >= build.version)
            .collect();
        versions.sort_unstable_by(|a, b| b.cmp(a));

        for version in versions {
            let Some(manifest) = lifecycle::installed_manifest(store, version).await? else {
                tracing::info!(version = %version, "ignoring store without a finished install");
                continue;
            };
            if version == build.version && manifest != build.manifest {
                tracing::info!(version = %version, "stored manifest differs from build, reinstalling");
                continue;
            }
            return Ok(Some((version, manifest)));
        }
        Ok(None)
    }

    /// Install `build` if it is newer than every version already present.
    pub async fn update(&self, build: AgentBuild) -> Result<UpdateStatus, Error> {
        let _guard = self.updates.lock().await;

        let newest = self.active_version().await.max(self.waiting_version().await);
        if newest.is_some_and(|current| build.version <= current) {
            tracing::debug!(version = %build.version, "build is not newer, ignoring");
            return Ok(UpdateStatus::UpToDate);
        }

        let agent = Arc::new(Agent::new(self.context.clone(), build.version, build.manifest)?);
        let immediate = match agent.dispatch(AgentEvent::Install).await {
            Action::SkipWaiting => true,
            Action::WaitUntil(Ok(())) => self.context.messenger.is_empty().await,
            Action::WaitUntil(Err(e)) | Action::Failed(e) => {
                tracing::warn!(version = %build.version, error = %e, "update failed, keeping current version");
                return Err(e);
            }
            other => {
                return Err(Error::InvalidState { action: "install", state: format!("{other:?}") });
            }
        };

        if let Some(previous) = self.waiting.lock().await.replace(Arc::clone(&agent)) {
            previous.retire().await;
        }

        if immediate {
            self.promote_waiting().await?;
            Ok(UpdateStatus::Activated(build.version))
        } else {
            tracing::info!(version = %build.version, "new version waiting for pages to close");
            Ok(UpdateStatus::Waiting(build.version))
        }
    }

    /// Activate the waiting version now. Returns its version, if there was one.
    pub async fn skip_waiting(&self) -> Result<Option<CacheVersion>, Error> {
        let _guard = self.updates.lock().await;
        self.promote_waiting().await
    }

    /// Caller must hold `updates`.
    async fn promote_waiting(&self) -> Result<Option<CacheVersion>, Error> {
        let mut waiting = self.waiting.lock().await;
        let Some(agent) = waiting.clone() else {
            return Ok(None);
        };

        // On failure the agent stays waiting so a later skip can retry.
        agent.activate().await?;
        waiting.take();
        drop(waiting);

        let previous = self.active.write().await.replace(Arc::clone(&agent));
        if let Some(previous) = previous {
            previous.retire().await;
        }

        tracing::info!(version = %agent.version(), "version activated");
        Ok(Some(agent.version()))
    }

    /// Route a fetch to the active version.
    pub async fn handle_fetch(&self, request: AgentRequest) -> Action {
        let active = self.active.read().await.clone();
        match active {
            Some(agent) => agent.dispatch(AgentEvent::Fetch(request)).await,
            None => Action::Passthrough,
        }
    }

    /// Route a page message.
    ///
    /// `SKIP_WAITING` goes to the waiting version; everything else goes to the
    /// active one.
    pub async fn handle_message(&self, from: ClientId, message: ClientMessage) -> Action {
        let target = match message {
            ClientMessage::SkipWaiting => self.waiting.lock().await.clone(),
            _ => self.active.read().await.clone(),
        };
        let Some(agent) = target else {
            tracing::debug!(client = %from, "no version to receive message");
            return Action::Ignored;
        };

        match agent.dispatch(AgentEvent::Message { from, message }).await {
            Action::SkipWaiting => Action::WaitUntil(self.skip_waiting().await.map(|_| ())),
            other => other,
        }
    }

    /// Deliver a non-fetch functional event to the active version.
    pub async fn handle_event(&self, event: AgentEvent) -> Action {
        let active = self.active.read().await.clone();
        match active {
            Some(agent) => agent.dispatch(event).await,
            None => Action::Ignored,
        }
    }

    /// Connect a page under this registration's scope.
    pub async fn client_opened(&self, url: Url) -> Result<ClientHandle, Error> {
        if url.origin() != self.context.origin.origin() {
            return Err(Error::InvalidUrl(format!("{url} is outside {}", self.context.origin)));
        }
        let controller = self.active_version().await;
        Ok(self.context.messenger.connect(url, controller).await)
    }

    /// Disconnect a page. Closing the last page activates a waiting version.
    pub async fn client_closed(&self, id: ClientId) -> bool {
        let removed = self.context.messenger.disconnect(id).await;

        if removed && self.context.messenger.is_empty().await && self.waiting_version().await.is_some() {
            if let Err(e) = self.skip_waiting().await {
                tracing::error!(error = %e, "failed to activate waiting version after last page closed");
            }
        }
        removed
    }

    /// Wait for background writes of the active version.
    pub async fn settle(&self) {
        let active = self.active.read().await.clone();
        if let Some(agent) = active {
            agent.settle().await;
        }
    }
}

#[async_trait]
impl Registration for AgentRegistration {
    async fn register(&self, page: Url) -> Result<ClientHandle, Error> {
        self.client_opened(page).await
    }

    async fn check_for_update(&self) -> Result<UpdateStatus, Error> {
        let latest = self.latest.read().await.clone();
        match latest {
            Some(build) => self.update(build).await,
            None => Ok(UpdateStatus::UpToDate),
        }
    }

    async fn post_message(&self, from: ClientId, message: ClientMessage) -> Result<(), Error> {
        match self.handle_message(from, message).await {
            Action::WaitUntil(Err(e)) | Action::Failed(e) => Err(e),
            _ => Ok(()),
        }
    }
}
