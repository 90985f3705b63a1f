//! The offgrid agent: fetch strategies, version lifecycle, registration and
//! the stdio host that drives them.

pub mod agent;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod notification;
pub mod registration;
pub mod strategy;

pub use agent::{Action, Agent, AgentContext, AgentEvent};
pub use error::HostError;
pub use host::Host;
pub use registration::{AgentBuild, AgentRegistration};
