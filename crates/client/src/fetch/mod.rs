//! Network access for the agent.
//!
//! ### The network seam
//! - Strategies never talk to `reqwest` directly; they go through [`Network`]
//!   so tests can substitute a scripted fake.
//! - A transport failure (DNS, refused, reset) is `Err(Error::Network)`.
//! - Any HTTP status, including 4xx/5xx, is `Ok`; deciding what to cache is
//!   the caller's business.
//! - Bodies are returned whatever their size. The capture limit applies only
//!   where a response is written to a store.
//!
//! ### No timeout
//! - Requests carry no client-side timeout. Whatever the transport reports
//!   surfaces as a failure, and every strategy treats failure the same way.

#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod url;

use async_trait::async_trait;
use reqwest::{Client, Method, header};
use std::time::Instant;

pub use self::url::{UrlError, resolve};

use offgrid_core::{AgentRequest, CapturedResponse, Error};

/// Something a request can be sent to.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &AgentRequest) -> Result<CapturedResponse, Error>;
}

/// Configuration for the HTTP network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// User agent string (default: "offgrid/0.1")
    pub user_agent: String,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { user_agent: "offgrid/0.1".to_string(), max_redirects: 5 }
    }
}

impl NetworkConfig {
    pub fn from_agent_config(config: &offgrid_core::AgentConfig) -> Self {
        Self { user_agent: config.user_agent.clone(), ..Default::default() }
    }
}

/// `reqwest`-backed network.
pub struct HttpNetwork {
    http: Client,
    config: NetworkConfig,
}

impl HttpNetwork {
    /// Create a new network client with the given configuration.
    pub fn new(config: NetworkConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &AgentRequest) -> Result<CapturedResponse, Error> {
        let start = Instant::now();
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| Error::InvalidInput(format!("invalid method {}: {}", request.method, e)))?;

        let mut builder = self.http.request(method, request.url.as_str());
        if let Some(accept) = &request.accept {
            builder = builder.header(header::ACCEPT, accept);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("{}: {}", request.url, e)))?;

        let status = response.status().as_u16();

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("failed to read response: {}", e)))?;

        tracing::debug!(
            url = %request.url,
            status,
            bytes = body.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "network fetch"
        );

        Ok(CapturedResponse { status, headers, body })
    }
}
