//! Protocol output capabilities.
//!
//! See [`Outbox`] type.
//!
//! Components never touch the network themselves. Messages to send, peers to drop and
//! events to report are pushed to an outbox, which the connection owner drains.
use log::*;
use std::fmt;

pub use crossbeam_channel as chan;

use bulwark_common::bitcoin::network::message::NetworkMessage;
use bulwark_common::bitcoin::network::message_blockdata::GetHeadersMessage;
use bulwark_common::bitcoin::BlockHash;
use bulwark_common::p2p::PeerId;

use crate::event::Event;

/// Output of the peer manager, to be processed by the connection owner.
#[derive(Debug, Clone)]
pub enum Io {
    /// Send a message to a peer.
    Write(PeerId, NetworkMessage),
    /// Disconnect from a peer.
    Disconnect(PeerId, DisconnectReason),
    /// Emit an event.
    Event(Event),
}

impl From<Event> for Io {
    fn from(event: Event) -> Self {
        Io::Event(event)
    }
}

/// Disconnect reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer reached the misbehavior threshold. Includes the peer's score.
    PeerMisbehaving(u32),
    /// Peer shares an address with a discouraged peer.
    Discouraged,
    /// Peer failed to show us a chain with as much work as ours in time.
    StaleChain,
    /// We have more outbound full-relay peers than we want.
    ExtraOutbound,
    /// We have more block-relay-only peers than we want.
    ExtraBlockRelay,
}

impl DisconnectReason {
    /// Whether the peer is being dropped for something it did wrong, as opposed to
    /// making room for other peers.
    pub fn is_punishment(&self) -> bool {
        matches!(
            self,
            Self::PeerMisbehaving(_) | Self::Discouraged | Self::StaleChain
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerMisbehaving(score) => write!(f, "peer misbehaving (score = {})", score),
            Self::Discouraged => write!(f, "peer address is discouraged"),
            Self::StaleChain => write!(f, "peer chain is stale"),
            Self::ExtraOutbound => write!(f, "extra outbound peer"),
            Self::ExtraBlockRelay => write!(f, "extra block-relay-only peer"),
        }
    }
}

/// Used to construct outputs.
#[derive(Debug, Clone)]
pub struct Outbox {
    /// Output channel.
    outbound: chan::Sender<Io>,
    /// Log target.
    target: &'static str,
}

impl Outbox {
    /// Create a new outbox.
    pub fn new(outbound: chan::Sender<Io>, target: &'static str) -> Self {
        Self { outbound, target }
    }

    /// Create a new outbox, along with the receiving end of its channel.
    pub fn unbounded(target: &'static str) -> (Self, chan::Receiver<Io>) {
        let (tx, rx) = chan::unbounded();

        (Self::new(tx, target), rx)
    }

    /// Push an output to the channel.
    pub fn push(&self, output: Io) {
        if self.outbound.send(output).is_err() {
            warn!(target: self.target, "Output dropped: receiver disconnected");
        }
    }

    /// Push a message to the channel.
    pub fn message(&self, peer: PeerId, message: NetworkMessage) -> &Self {
        debug!(target: self.target, "{}: Sending {:?}", peer, message.cmd());

        self.push(Io::Write(peer, message));
        self
    }

    /// Ask a peer for headers following the given locators.
    pub fn get_headers(&self, peer: PeerId, locators: Vec<BlockHash>, stop: BlockHash) -> &Self {
        self.message(
            peer,
            NetworkMessage::GetHeaders(GetHeadersMessage::new(locators, stop)),
        )
    }

    /// Disconnect from a peer.
    pub fn disconnect(&self, peer: PeerId, reason: DisconnectReason) {
        if reason.is_punishment() {
            info!(target: self.target, "{}: Disconnecting: {}", peer, reason);
        } else {
            debug!(target: self.target, "{}: Disconnecting: {}", peer, reason);
        }

        self.push(Io::Disconnect(peer, reason));
    }

    /// Push an event to the channel.
    pub fn event(&self, event: Event) {
        self.push(Io::Event(event));
    }
}
