//! Client code for offgrid.
//!
//! This crate provides the network seam the agent fetches through and the
//! page-resident counterparts of the agent: the update coordinator and the
//! connectivity monitor.

pub mod fetch;
pub mod page;

pub use fetch::{HttpNetwork, Network, NetworkConfig, UrlError, resolve};
pub use page::{
    Banner, ConnectivityMonitor, ConnectivityState, CoordinatorConfig, PageHost, Registration, UpdateCoordinator,
    UpdateStatus,
};
