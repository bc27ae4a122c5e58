//! Peer-to-peer errors.
use std::io;

use thiserror::Error;

/// An error occuring in the peer-to-peer layer.
///
/// Misbehaving peers never produce errors: they are scored, discouraged or
/// disconnected instead. Only persistence can fail.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The persisted ban list could not be decoded.
    #[error("invalid ban list: {0}")]
    BanList(String),
}
