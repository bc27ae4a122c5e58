//! Bulwark protects a Bitcoin node from peers that waste its resources.
//!
//! The project is broken down into the following crates:
//!
//! * [`p2p`]: peer eviction, misbehavior scoring, discouragement and the orphan pool
//! * [`common`]: addresses, connection types, time and other shared types
//!
//! The [`p2p`] crate is the entry point for most users of the library.

#[cfg(feature = "bulwark-common")]
pub use bulwark_common as common;
#[cfg(feature = "bulwark-p2p")]
pub use bulwark_p2p as p2p;

#[cfg(test)]
pub use bulwark_test as test;
