//! Online/offline tracking for the offline banner.
//!
//! A pure observer: it is fed transitions by the embedder and never touches
//! the network itself.

use serde::Serialize;
use tokio::sync::watch;

/// Observable connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    pub online: bool,
    /// Went offline at some point this session and has not been acknowledged.
    pub was_offline: bool,
}

/// Banner the UI should show for a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Banner {
    None,
    Offline,
    BackOnline,
}

impl ConnectivityState {
    pub fn banner(&self) -> Banner {
        match (self.online, self.was_offline) {
            (false, _) => Banner::Offline,
            (true, true) => Banner::BackOnline,
            (true, false) => Banner::None,
        }
    }
}

#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(ConnectivityState { online: initially_online, was_offline: !initially_online });
        Self { state }
    }

    pub fn set_online(&self) {
        self.state.send_if_modified(|s| {
            let changed = !s.online;
            s.online = true;
            changed
        });
    }

    pub fn set_offline(&self) {
        self.state.send_if_modified(|s| {
            let changed = s.online || !s.was_offline;
            s.online = false;
            s.was_offline = true;
            changed
        });
    }

    /// Acknowledge a past outage, dismissing the back-online banner.
    pub fn clear_was_offline(&self) {
        self.state.send_if_modified(|s| std::mem::replace(&mut s.was_offline, false));
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
