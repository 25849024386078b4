//! Domain errors raised by the handshake, the channel broker and RPC calls.
//!
//! Errors are `thiserror` enums with structured context. I/O errors are
//! wrapped in `Arc` so the enums stay `Clone` and small enough for the
//! `result_large_err` lint.

use std::sync::Arc;

use thiserror::Error;

use crate::frame::{ChannelId, Role};
use crate::rpc::FaultCode;


/// Reason reported when a dial targets a channel nobody listens on.
pub const REASON_NOT_BOUND: &str = "not bound";

/// Reason reported when a dial targets a binding another dial consumed.
pub const REASON_ALREADY_DIALED: &str = "already dialed";

/// Errors arising from channel allocation, binding and transport I/O.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The peer has no listener bound for the requested channel.
    #[error("channel {id} on the {listener} side is not available: {reason}")]
    NotBound {
        /// Side that was expected to listen.
        listener: Role,
        /// Channel that was dialed.
        id: ChannelId,
        /// Reason given by the listening side.
        reason: String,
    },

    /// A listener is already registered for the channel.
    #[error("channel {id} already has a listener")]
    AlreadyBound {
        /// Channel that was bound twice.
        id: ChannelId,
    },

    /// Another dial to the same channel has not completed yet.
    #[error("a dial to channel {id} is already in progress")]
    DialInProgress {
        /// Channel being dialed.
        id: ChannelId,
    },

    /// The peer did not accept or reject the dial in time.
    #[error("dial to channel {id} timed out after {timeout_ms}ms")]
    DialTimeout {
        /// Channel being dialed.
        id: ChannelId,
        /// Configured dial timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Every channel identifier of the session has been handed out.
    #[error("channel identifier space exhausted")]
    Exhausted,

    /// The session transport is closed.
    #[error("session transport closed")]
    SessionClosed,

    /// The logical channel was closed by either side.
    #[error("channel {id} is closed")]
    ChannelClosed {
        /// Closed channel.
        id: ChannelId,
    },

    /// A frame could not be encoded for the wire.
    #[error("failed to encode frame: {message}")]
    Encode {
        /// Serializer failure description.
        message: String,
    },

    /// Writing to or reading from the transport failed.
    #[error("transport I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl BrokerError {
    /// Returns `true` when the failure means the channel or session is gone.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::SessionClosed | Self::ChannelClosed { .. } | Self::Io { .. }
        )
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}

/// Errors raised while negotiating a session.
#[derive(Debug, Clone, Error)]
pub enum HandshakeError {
    /// The expected cookie variable is absent from the worker environment.
    #[error("handshake cookie '{key}' is not set; this binary is a plugin and is not meant to be run directly")]
    MissingCookie {
        /// Environment variable that was looked up.
        key: String,
    },

    /// The cookie value does not match the shared secret.
    #[error("handshake cookie does not match")]
    CookieMismatch,

    /// The two sides speak different protocol versions.
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this side speaks.
        expected: u32,
        /// Version the peer announced.
        actual: u32,
    },

    /// The hello line could not be parsed.
    #[error("malformed handshake: {message}")]
    Malformed {
        /// Parse failure description.
        message: String,
    },

    /// The worker did not announce itself within the handshake timeout.
    #[error("handshake timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The transport closed before the hello line arrived.
    #[error("transport closed before the handshake completed")]
    Eof,

    /// Reading or writing the hello line failed.
    #[error("handshake I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl From<std::io::Error> for HandshakeError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}

/// Errors returned from an RPC call.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The underlying channel failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The connection closed while the call was outstanding.
    #[error("connection closed before '{method}' completed")]
    ConnectionClosed {
        /// Method that was in flight.
        method: String,
    },

    /// The call exceeded its deadline.
    #[error("call '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Method that timed out.
        method: String,
        /// Effective timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The caller cancelled the call.
    #[error("call '{method}' was cancelled")]
    Cancelled {
        /// Method that was cancelled.
        method: String,
    },

    /// The remote handler answered with a fault.
    #[error("'{method}' failed remotely ({code}): {message}")]
    Fault {
        /// Method that failed.
        method: String,
        /// Fault classification.
        code: FaultCode,
        /// Remote failure description.
        message: String,
    },

    /// Request parameters could not be encoded.
    #[error("failed to encode parameters for '{method}': {message}")]
    Encode {
        /// Method being called.
        method: String,
        /// Serializer failure description.
        message: String,
    },

    /// The response payload did not match the expected shape.
    #[error("failed to decode the response to '{method}': {message}")]
    Decode {
        /// Method being called.
        method: String,
        /// Deserializer failure description.
        message: String,
    },
}

impl RpcError {
    /// Returns `true` for transport-class failures, as opposed to faults
    /// produced by the remote service itself.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        match self {
            Self::Broker(err) => err.is_transport(),
            Self::ConnectionClosed { .. } => true,
            Self::Timeout { .. }
            | Self::Cancelled { .. }
            | Self::Fault { .. }
            | Self::Encode { .. }
            | Self::Decode { .. } => false,
        }
    }
}
