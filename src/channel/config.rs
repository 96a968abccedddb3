//! Per-channel options chosen at registration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{addr::ResolverKind, layout::PeerRole};

/// Options for one peer's channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Master owns the arena allocator and hands out blocks
    pub role: PeerRole,
    /// How the block address table names pages
    pub resolver: ResolverKind,
    /// Stamp blocks on hand-off and verify the stamp on receipt
    pub sentinel_check: bool,
    /// Default bound for [`MessageChannel::wait_for_peer`](super::MessageChannel::wait_for_peer)
    pub peer_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(role: PeerRole) -> Self {
        Self {
            role,
            resolver: ResolverKind::default(),
            sentinel_check: false,
            peer_timeout: Duration::from_secs(5),
        }
    }

    pub fn master() -> Self {
        Self::new(PeerRole::Master)
    }

    pub fn slave() -> Self {
        Self::new(PeerRole::Slave)
    }

    pub fn with_resolver(mut self, resolver: ResolverKind) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_sentinel_check(mut self, enabled: bool) -> Self {
        self.sentinel_check = enabled;
        self
    }

    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }
}
