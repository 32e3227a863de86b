//! Error taxonomy surfaced by [`AgentClient`](crate::AgentClient).
//!
//! Every `invoke` either returns a result or one of these variants. Only
//! `ConnectionLost` is ever delivered to more than one caller at a time.

use std::time::Duration;

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// An operation needed a live connection and there was none.
    #[error("not connected")]
    NotConnected,
    /// `connect` was called on a client that is already connected.
    #[error("already connected")]
    AlreadyConnected,
    /// No terminal response arrived within the effective timeout tier.
    #[error("timed out after {timeout:?} waiting for response to {command}")]
    Timeout { command: String, timeout: Duration },
    /// The bridge reported a failure for this request. Passed through verbatim.
    #[error("{0}")]
    Remote(String),
    /// The transport closed while the request was outstanding.
    #[error("connection lost")]
    ConnectionLost,
    /// Two pending entries claimed the same id. Indicates a bug in id allocation.
    #[error("request id {0} is already in flight")]
    DuplicateId(u64),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("frame codec failed: {0}")]
    Codec(#[from] frames::CodecError),
}

impl ClientError {
    /// Whether the error came from the remote side rather than this client.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}
