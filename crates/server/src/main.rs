//! offgrid agent entry point.
//!
//! Boots the agent for the configured origin and serves the JSON-lines host
//! protocol on stdio. Logging goes to stderr to keep stdout for the protocol.

use std::sync::Arc;

use anyhow::Result;
use offgrid_client::{HttpNetwork, NetworkConfig};
use offgrid_core::{AgentConfig, CacheDb, CacheStore, MemoryStore, Messenger};
use offgrid_server::{AgentBuild, AgentContext, AgentRegistration, Host};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let ephemeral = std::env::args().skip(1).any(|arg| arg == "--ephemeral");
    let config = AgentConfig::load()?;
    let origin = config.origin_url()?;

    let store: Arc<dyn CacheStore> = if ephemeral {
        tracing::info!("using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        tracing::info!(path = %config.db_path.display(), "opening cache database");
        Arc::new(CacheDb::open(&config.db_path).await?)
    };
    let network = Arc::new(HttpNetwork::new(NetworkConfig::from_agent_config(&config))?);

    let registration = Arc::new(AgentRegistration::new(AgentContext {
        origin: origin.clone(),
        store,
        network,
        messenger: Messenger::new(),
        fast_takeover: config.fast_takeover,
        max_body_bytes: config.max_body_bytes,
    }));

    tracing::info!(%origin, "starting offgrid agent on stdio");

    match registration.restore(AgentBuild::builtin()).await {
        Ok(status) => tracing::info!(?status, "agent ready"),
        Err(e) => tracing::warn!(error = %e, "builtin version not installed, fetches pass through"),
    }

    let host = Host::new(registration);
    let mut stdout = host.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    tokio::io::AsyncWriteExt::flush(&mut stdout).await?;

    Ok(())
}
