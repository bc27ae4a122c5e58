//! Bulwark's peer-to-peer anti-abuse library.
//!
//! The crate decides which remote peers a node keeps, which it disconnects and which
//! it discourages, and how many unverifiable orphan transactions it buffers on their
//! behalf. It is made of three components:
//!
//! * [`PeerManager`][peermgr]: tracks connected peers, evicts outbound peers that
//!   don't help us make chain progress, and scores misbehavior
//! * [`BanManager`][banman]: remembers discouraged and banned addresses across
//!   connections and restarts
//! * [`TxOrphanage`][orphanage]: a bounded pool of transactions with missing inputs
//!
//! [peermgr]: crate::peermgr::PeerManager
//! [banman]: crate::banman::BanManager
//! [orphanage]: crate::orphanage::TxOrphanage
//!
//! Like the rest of bulwark, these components are *I/O-free*. The connection owner
//! reports what happens on the network, drains the [`Io`](crate::output::Io) outputs
//! and acts on them. Time is read from an injected
//! [`Clock`](bulwark_common::time::Clock) and randomness comes from an injected
//! [`fastrand::Rng`], so that every test is reproducible.
//!
//! All components take `&self` and can be shared between threads.
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]
#![deny(missing_docs, unsafe_code)]
pub mod banman;
pub mod error;
pub mod event;
pub mod orphanage;
pub mod output;
pub mod peermgr;

pub use bulwark_common::bitcoin;
pub use bulwark_common::p2p::PeerId;

pub use banman::{BanManager, Discourage};
pub use error::Error;
pub use event::Event;
pub use orphanage::TxOrphanage;
pub use output::{DisconnectReason, Io, Outbox};
pub use peermgr::{PeerManager, Tip};
