//! Worker-side manager for the reverse connection to host services.
//!
//! A worker holds at most one connection to host services at a time. The
//! host announces a channel through the forward surface; [`ReverseConnection::connect`]
//! dials it once, mints a [`ClientId`] for it, and keeps the resulting
//! [`HostServiceClient`] until [`ReverseConnection::disconnect`] or until the
//! host closes the channel.
//!
//! Dials are serialized by their own lock, so readers of the current client
//! never wait on a dial in progress.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use hst_broker::{Broker, ChannelId};
use hst_hostserve::{ClientId, HostServiceClient};
use tracing::{debug, info};

use crate::error::ReverseConnectionError;


const REVERSE_TARGET: &str = "hst_plugins::reverse";

/// Owns the worker's single connection to host services.
#[derive(Debug)]
pub struct ReverseConnection {
    broker: Broker,
    call_timeout: Duration,
    dialing: Mutex<()>,
    active: Mutex<Option<HostServiceClient>>,
}

impl ReverseConnection {
    /// Creates a manager dialing through `broker`, with `call_timeout`
    /// bounding each host call.
    #[must_use]
    pub const fn new(broker: Broker, call_timeout: Duration) -> Self {
        Self {
            broker,
            call_timeout,
            dialing: Mutex::new(()),
            active: Mutex::new(None),
        }
    }

    /// Dials host services on `channel` and returns the new client
    /// identity.
    ///
    /// A connection the host has already closed is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`ReverseConnectionError::AlreadyConnected`] while a live
    /// connection exists, and [`ReverseConnectionError::Dial`] when the
    /// host refuses or the session is down.
    pub fn connect(&self, channel: ChannelId) -> Result<ClientId, ReverseConnectionError> {
        let _dialing = self.dialing.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = self.client() {
            return Err(ReverseConnectionError::AlreadyConnected {
                client_id: client.client_id(),
            });
        }
        let dial_failed = |source| ReverseConnectionError::Dial { channel, source };
        let connection = self.broker.dial(channel).map_err(dial_failed)?;
        let client_id = ClientId::generate();
        let client =
            HostServiceClient::new(connection, client_id, self.call_timeout).map_err(dial_failed)?;
        info!(
            target: REVERSE_TARGET,
            channel = %channel,
            client_id = %client_id,
            "host services connected"
        );
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(client);
        Ok(client_id)
    }

    /// Returns the live host-service client, if any.
    #[must_use]
    pub fn client(&self) -> Option<HostServiceClient> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|client| !client.is_closed())
            .cloned()
    }

    /// Returns `true` while a live connection exists.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client().is_some()
    }

    /// Closes the connection, if any, so a later [`Self::connect`] may
    /// succeed.
    ///
    /// Returns the identity of the connection that was closed. Calling this
    /// without a connection is a no-op.
    pub fn disconnect(&self) -> Option<ClientId> {
        let taken = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        taken.map(|client| {
            client.close();
            debug!(
                target: REVERSE_TARGET,
                client_id = %client.client_id(),
                "host services disconnected"
            );
            client.client_id()
        })
    }
}

impl Drop for ReverseConnection {
    fn drop(&mut self) {
        if let Some(client) = self.disconnect() {
            debug!(target: REVERSE_TARGET, client_id = %client, "closed on drop");
        }
    }
}
