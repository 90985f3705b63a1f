//! Page-resident counterparts of the agent.

pub mod connectivity;
pub mod coordinator;

pub use connectivity::{Banner, ConnectivityMonitor, ConnectivityState};
pub use coordinator::{CoordinatorConfig, PageHost, Registration, UpdateCoordinator, UpdateStatus};
