//! Online / reachable state tracking.
//!
//! Two independent signals gate network attempts:
//!
//! - `os_online`: the host's connectivity signal, fed in via
//!   [`Reachability::set_os_online`].
//! - `server_reachable`: learned from traffic. Flips false only on a
//!   failed explicit ping or a gateway-class push/pull failure; flips
//!   true immediately on any successful push, pull, or ping.
//!
//! The loop syncs only when both hold. When online but unreachable it
//! probes with one ping per cycle instead of a full push/pull.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared reachability flags.
#[derive(Debug)]
pub struct Reachability {
    os_online: AtomicBool,
    server_reachable: AtomicBool,
}

impl Default for Reachability {
    fn default() -> Self {
        Self {
            os_online: AtomicBool::new(true),
            server_reachable: AtomicBool::new(true),
        }
    }
}

impl Reachability {
    /// Creates flags in the optimistic initial state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Both signals hold.
    pub fn is_online(&self) -> bool {
        self.os_online() && self.server_reachable()
    }

    /// The host believes it has connectivity.
    pub fn os_online(&self) -> bool {
        self.os_online.load(Ordering::Acquire)
    }

    /// The server answered recently.
    pub fn server_reachable(&self) -> bool {
        self.server_reachable.load(Ordering::Acquire)
    }

    /// Feeds the host's online/offline signal.
    pub fn set_os_online(&self, online: bool) {
        self.os_online.store(online, Ordering::Release);
    }

    /// Notes a successful push, pull, or ping.
    pub fn mark_reachable(&self) {
        self.server_reachable.store(true, Ordering::Release);
    }

    /// Notes a failed ping or a gateway-class failure.
    pub fn mark_unreachable(&self) {
        self.server_reachable.store(false, Ordering::Release);
    }
}
