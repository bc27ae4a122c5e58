//! Library of common functionality shared by all `bulwark` crates.
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]
pub mod collections;
pub mod network;
pub mod p2p;
pub mod time;

pub use bitcoin;
pub use bitcoin_hashes;
