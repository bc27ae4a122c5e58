//! Peer-related events.
use std::fmt;

use bulwark_common::p2p::{ConnectionType, NetAddr, PeerId, Service};
use bulwark_common::time::LocalTime;

use crate::output::DisconnectReason;

/// An event originating in the peer manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A peer was registered.
    PeerConnected {
        /// Peer id.
        peer: PeerId,
        /// Remote address.
        addr: Service,
        /// Connection type.
        conn_type: ConnectionType,
    },
    /// A peer was unregistered.
    PeerDisconnected {
        /// Peer id.
        peer: PeerId,
        /// Remote address.
        addr: Service,
    },
    /// A peer's misbehavior score went up.
    PeerMisbehaved {
        /// Peer id.
        peer: PeerId,
        /// Score after the increase.
        score: u32,
        /// What the peer did.
        reason: String,
    },
    /// A peer's address was discouraged.
    PeerDiscouraged {
        /// Peer id.
        peer: PeerId,
        /// Discouraged address.
        addr: NetAddr,
    },
    /// A peer was added to the protected set.
    PeerProtected {
        /// Peer id.
        peer: PeerId,
    },
    /// A peer was flagged for disconnection.
    PeerEvicted {
        /// Peer id.
        peer: PeerId,
        /// Why.
        reason: DisconnectReason,
    },
    /// Our tip hasn't moved in a while. We should look for an extra outbound peer.
    StaleTip {
        /// Last time the tip was updated.
        last_update: LocalTime,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerConnected {
                peer,
                addr,
                conn_type,
            } => write!(f, "{}: Connected to {} ({})", peer, addr, conn_type),
            Self::PeerDisconnected { peer, addr } => {
                write!(f, "{}: Disconnected from {}", peer, addr)
            }
            Self::PeerMisbehaved {
                peer,
                score,
                reason,
            } => write!(f, "{}: Misbehaving (score = {}): {}", peer, score, reason),
            Self::PeerDiscouraged { peer, addr } => {
                write!(f, "{}: Address {} discouraged", peer, addr)
            }
            Self::PeerProtected { peer } => write!(f, "{}: Protected from eviction", peer),
            Self::PeerEvicted { peer, reason } => write!(f, "{}: Evicted: {}", peer, reason),
            Self::StaleTip { last_update } => {
                write!(f, "Potential stale tip (last update at {})", last_update)
            }
        }
    }
}
