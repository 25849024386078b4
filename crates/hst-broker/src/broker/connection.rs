//! One end of an open logical channel.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde_json::Value;
use tracing::debug;

use super::{BROKER_TARGET, ChannelKey, Shared};
use crate::error::BrokerError;
use crate::frame::{ChannelId, Frame, FrameBody, Role};

/// A bidirectional logical channel carrying JSON payloads.
///
/// Dropping the connection closes it. Closing twice is a no-op.
pub struct Connection {
    key: ChannelKey,
    inbound: Receiver<Value>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl Connection {
    pub(super) const fn new(key: ChannelKey, inbound: Receiver<Value>, shared: Arc<Shared>) -> Self {
        Self {
            key,
            inbound,
            shared,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the channel identifier.
    #[must_use]
    pub const fn id(&self) -> ChannelId {
        self.key.id
    }

    /// Returns the side that listened for this channel.
    #[must_use]
    pub const fn listener(&self) -> Role {
        self.key.listener
    }

    /// Sends one payload to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ChannelClosed`] after [`Self::close`], and
    /// [`BrokerError::SessionClosed`] or [`BrokerError::Io`] when the
    /// transport is gone.
    pub fn send(&self, payload: Value) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ChannelClosed { id: self.key.id });
        }
        self.shared.send_frame(&Frame::new(
            self.key.listener,
            self.key.id,
            FrameBody::Data { payload },
        ))
    }

    /// Blocks until the peer sends a payload.
    ///
    /// # Errors
    ///
    /// Returns a transport-class error once the channel or the session is
    /// closed and every queued payload has been received.
    pub fn recv(&self) -> Result<Value, BrokerError> {
        self.inbound.recv().map_err(|_| self.closed_error())
    }

    /// Waits up to `timeout` for a payload, returning `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Self::recv`].
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Value>, BrokerError> {
        match self.inbound.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed_error()),
        }
    }

    /// Closes the channel and tells the peer.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.forget_channel(self.key);
        if !self.shared.is_live() {
            return;
        }
        if let Err(err) = self.shared.send_frame(&Frame::new(
            self.key.listener,
            self.key.id,
            FrameBody::Close,
        )) {
            debug!(
                target: BROKER_TARGET,
                channel = %self.key.id,
                error = %err,
                "close frame not delivered"
            );
        }
    }

    /// Returns `true` once this end has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> BrokerError {
        if self.shared.is_live() {
            BrokerError::ChannelClosed { id: self.key.id }
        } else {
            BrokerError::SessionClosed
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.key.id)
            .field("listener", &self.key.listener)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
