//! Shared peer types.
use std::fmt;

/// Process-local peer identifier. Never reused.
pub type PeerId = u64;

/// The kind of connection we have with a peer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Connection initiated by the remote.
    Inbound,
    /// Outbound connection relaying blocks, transactions and addresses.
    OutboundFullRelay,
    /// Outbound connection relaying blocks only.
    BlockRelay,
    /// Short-lived outbound connection used to test an address.
    Feeler,
    /// Connection explicitly requested by the user.
    Manual,
    /// Short-lived outbound connection used to fetch addresses.
    AddrFetch,
}

impl ConnectionType {
    /// Whether the connection was initiated by us.
    pub fn is_outbound(&self) -> bool {
        !matches!(self, Self::Inbound)
    }

    /// Whether this is an inbound connection.
    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::Inbound)
    }

    /// Whether this is an automatic outbound full-relay connection.
    pub fn is_outbound_full_relay(&self) -> bool {
        matches!(self, Self::OutboundFullRelay)
    }

    /// Whether this is a block-relay-only connection.
    pub fn is_block_only(&self) -> bool {
        matches!(self, Self::BlockRelay)
    }

    /// Whether the connection was requested by the user.
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }

    /// Whether we expect to sync headers with this peer.
    pub fn is_sync_candidate(&self) -> bool {
        matches!(self, Self::OutboundFullRelay | Self::BlockRelay | Self::Manual)
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::OutboundFullRelay => write!(f, "outbound-full-relay"),
            Self::BlockRelay => write!(f, "block-relay-only"),
            Self::Feeler => write!(f, "feeler"),
            Self::Manual => write!(f, "manual"),
            Self::AddrFetch => write!(f, "addr-fetch"),
        }
    }
}

/// Permissions granted to a peer by the local operator.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Permissions {
    /// Never discourage or disconnect this peer for misbehavior.
    pub noban: bool,
}

impl Permissions {
    /// Permissions with `noban` set.
    pub fn noban() -> Self {
        Self { noban: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_type() {
        assert!(ConnectionType::OutboundFullRelay.is_outbound());
        assert!(ConnectionType::Feeler.is_outbound());
        assert!(!ConnectionType::Inbound.is_outbound());
        assert!(ConnectionType::Manual.is_sync_candidate());
        assert!(!ConnectionType::Feeler.is_sync_candidate());
        assert_eq!(ConnectionType::BlockRelay.to_string(), "block-relay-only");
    }
}
