//! Error taxonomy for the handshake core.
//!
//! Every fallible operation in this crate returns one of these variants. The
//! driver never retries at this layer: a failed handshake means a dead
//! session, so callers are expected to close the socket and drop the
//! `Session` on any `Err`.

use std::io;

/// Errors produced while driving a session from accept through
/// `AUTHENTICATING`, or while dispatching post-handshake messages.
#[derive(Debug, thiserror::Error)]
pub enum SshError {
    /// A socket operation failed, or EOF was hit mid-handshake.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A malformed packet, a packet type illegal in the current state, an
    /// oversized banner, or an empty algorithm intersection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// DH arithmetic failure, signature failure, or key-derivation failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// No host key configured, or the bind address could not be used.
    #[error("config error: {0}")]
    Config(String),

    /// A buffer could not be grown to hold an incoming record.
    #[error("allocation error: {0}")]
    Alloc(String),
}

impl SshError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        SshError::Protocol(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        SshError::Crypto(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SshError::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SshError>;
