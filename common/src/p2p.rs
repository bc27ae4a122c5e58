//! P2P-related types
pub mod addr;
pub mod peer;

pub use addr::{NetAddr, OnionAddr, Service};
pub use peer::{ConnectionType, Permissions, PeerId};
