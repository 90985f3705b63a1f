//! Install and activation of a versioned agent.
//!
//! A version moves `installing → installed → activating → activated`. A
//! failed install and a superseded version both end in `redundant`.

use offgrid_client::{Network, resolve};
use offgrid_core::{
    AgentMessage, AgentRequest, CacheStore, CacheVersion, CapturedResponse, ClientId, Error, Manifest, Messenger,
    StoreEntry,
};
use serde::Serialize;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
            LifecycleState::Redundant => "redundant",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    version: CacheVersion,
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new(version: CacheVersion) -> Self {
        Self { version, state: LifecycleState::Installing }
    }

    /// A version whose store survived a restart.
    pub fn restored(version: CacheVersion) -> Self {
        Self { version, state: LifecycleState::Activated }
    }

    pub fn version(&self) -> CacheVersion {
        self.version
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn install_succeeded(&mut self) -> Result<(), Error> {
        self.transition("install_succeeded", LifecycleState::Installing, LifecycleState::Installed)
    }

    pub fn install_failed(&mut self) -> Result<(), Error> {
        self.transition("install_failed", LifecycleState::Installing, LifecycleState::Redundant)
    }

    pub fn begin_activation(&mut self) -> Result<(), Error> {
        self.transition("activate", LifecycleState::Installed, LifecycleState::Activating)
    }

    pub fn activation_succeeded(&mut self) -> Result<(), Error> {
        self.transition("activation_succeeded", LifecycleState::Activating, LifecycleState::Activated)
    }

    /// Cleanup failed; the version stays installed and may try again.
    pub fn activation_failed(&mut self) -> Result<(), Error> {
        self.transition("activation_failed", LifecycleState::Activating, LifecycleState::Installed)
    }

    /// Superseded by a newer version. Idempotent.
    pub fn retire(&mut self) {
        self.state = LifecycleState::Redundant;
    }

    fn transition(&mut self, action: &'static str, from: LifecycleState, to: LifecycleState) -> Result<(), Error> {
        if self.state != from {
            return Err(Error::InvalidState { action, state: self.state.to_string() });
        }
        tracing::debug!(version = %self.version, from = %from, to = %to, "lifecycle transition");
        self.state = to;
        Ok(())
    }
}

/// Key of the record an install writes last. It holds the manifest the
/// install completed, so a store without it never finished installing.
pub const BUILD_RECORD_KEY: &str = "offgrid:build-record";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: usize,
    /// Best-effort assets that could not be fetched.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stores removed during cleanup.
    pub deleted: Vec<String>,
    pub claimed: Vec<ClientId>,
    /// Clients that received `SW_UPDATED`.
    pub notified: usize,
}

/// Populate the store for `version` from `manifest`.
///
/// Required assets are all-or-nothing: on the first failure the new store is
/// deleted and [`Error::InstallFailed`] returned. Stores of other versions are
/// never touched here. Bodies over `capture_limit` count as failures.
pub async fn install(
    store: &dyn CacheStore, network: &dyn Network, origin: &Url, version: CacheVersion, manifest: &Manifest,
    capture_limit: usize,
) -> Result<InstallReport, Error> {
    let name = version.store_name();

    // A leftover store from an interrupted install is never trusted.
    if store.delete(&name).await? {
        tracing::info!(store = %name, "discarded partial store");
    }
    store.create(&name).await?;

    let mut report = InstallReport::default();

    for path in &manifest.required {
        if let Err(e) = fetch_into(store, network, origin, &name, path, capture_limit).await {
            return Err(abort_install(store, version, path, e).await);
        }
        report.cached += 1;
    }

    for path in &manifest.best_effort {
        match fetch_into(store, network, origin, &name, path, capture_limit).await {
            Ok(()) => report.cached += 1,
            Err(e) => {
                tracing::info!(version = %version, asset = %path, error = %e, "skipping optional asset");
                report.skipped.push(path.clone());
            }
        }
    }

    if let Err(e) = write_build_record(store, &name, manifest).await {
        return Err(abort_install(store, version, BUILD_RECORD_KEY, e).await);
    }

    tracing::info!(version = %version, cached = report.cached, skipped = report.skipped.len(), "install complete");
    Ok(report)
}

/// Manifest of a finished install of `version`, if its store holds one.
///
/// An unreadable record counts as absent.
pub async fn installed_manifest(store: &dyn CacheStore, version: CacheVersion) -> Result<Option<Manifest>, Error> {
    let Some(record) = store.get(&version.store_name(), BUILD_RECORD_KEY).await? else {
        return Ok(None);
    };

    match serde_json::from_slice(&record.response.body) {
        Ok(manifest) => Ok(Some(manifest)),
        Err(e) => {
            tracing::warn!(version = %version, error = %e, "unreadable build record");
            Ok(None)
        }
    }
}

/// Remove every other store, then take control of open pages.
///
/// The cleanup is a single all-or-nothing store operation; if it fails no
/// store is removed and no client is claimed.
pub async fn activate(
    store: &dyn CacheStore, messenger: &Messenger, version: CacheVersion,
) -> Result<ActivationReport, Error> {
    let deleted = store.delete_except(&version.store_name()).await?;
    for name in &deleted {
        tracing::info!(store = %name, "deleted outdated store");
    }

    let claimed = messenger.claim(version).await;
    let notified = messenger.notify(&claimed, &AgentMessage::SwUpdated).await;
    let report = ActivationReport { deleted, claimed, notified };

    tracing::info!(
        version = %version,
        deleted = report.deleted.len(),
        claimed = report.claimed.len(),
        notified = report.notified,
        "activation complete"
    );
    Ok(report)
}

async fn abort_install(store: &dyn CacheStore, version: CacheVersion, url: &str, e: Error) -> Error {
    tracing::warn!(version = %version, asset = %url, error = %e, "install aborted");
    if let Err(cleanup) = store.delete(&version.store_name()).await {
        tracing::error!(version = %version, error = %cleanup, "failed to delete store after install failure");
    }
    Error::InstallFailed { url: url.to_string(), reason: e.to_string() }
}

async fn write_build_record(store: &dyn CacheStore, name: &str, manifest: &Manifest) -> Result<(), Error> {
    let body = serde_json::to_vec(manifest)?;
    let response =
        CapturedResponse::new(200, vec![("Content-Type".into(), "application/json".into())], body);
    store.put(name, StoreEntry::record(BUILD_RECORD_KEY, response)).await
}

async fn fetch_into(
    store: &dyn CacheStore, network: &dyn Network, origin: &Url, name: &str, path: &str, capture_limit: usize,
) -> Result<(), Error> {
    let url = resolve(origin, path).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    let request = AgentRequest::get(url);
    let response = network.fetch(&request).await?;
    if !response.is_ok() {
        return Err(Error::HttpStatus(response.status));
    }
    if response.body.len() > capture_limit {
        return Err(Error::TooLarge { url: request.url.to_string(), bytes: response.body.len(), limit: capture_limit });
    }
    store.put(name, StoreEntry::capture(&request.method, &request.url, response)).await
}
