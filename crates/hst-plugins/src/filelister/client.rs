//! Host-side stub for the forward surface.

use std::time::Duration;

use hst_broker::{BrokerError, CallContext, ChannelId, Connection, RpcClient};
use hst_hostserve::ClientId;
use serde_json::json;

use super::{ListRequest, ListResponse, NotifyRequest, NotifyResponse, TeardownResponse, methods};
use crate::error::ForwardCallError;

/// Calls a worker's forward surface over the control channel.
#[derive(Debug, Clone)]
pub struct FileListerClient {
    rpc: RpcClient,
}

impl FileListerClient {
    /// Wraps the dialed control channel.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Io`] if the response reader cannot start.
    pub fn new(connection: Connection, timeout: Duration) -> Result<Self, BrokerError> {
        Ok(Self {
            rpc: RpcClient::with_timeout(connection, timeout)?,
        })
    }

    /// Lists `directory` through the worker.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardCallError::Plugin`] for listing failures and
    /// [`ForwardCallError::Rpc`] when the call does not complete.
    pub fn list(&self, ctx: &CallContext, directory: &str) -> Result<Vec<String>, ForwardCallError> {
        let request = ListRequest {
            directory: directory.to_owned(),
        };
        let response: ListResponse = self.rpc.call_typed(ctx, methods::LIST, &request)?;
        response
            .error
            .map_or(Ok(response.entries), |message| {
                Err(ForwardCallError::Plugin { message })
            })
    }

    /// Tells the worker to dial host services on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardCallError::Plugin`] when the worker could not dial,
    /// and [`ForwardCallError::Rpc`] when the call does not complete.
    pub fn notify_host_service_channel(
        &self,
        ctx: &CallContext,
        channel: ChannelId,
    ) -> Result<ClientId, ForwardCallError> {
        let response: NotifyResponse = self.rpc.call_typed(
            ctx,
            methods::NOTIFY_HOST_SERVICE_CHANNEL,
            &NotifyRequest { channel },
        )?;
        match (response.client_id, response.error) {
            (_, Some(message)) => Err(ForwardCallError::Plugin { message }),
            (Some(client_id), None) => Ok(client_id),
            (None, None) => Err(ForwardCallError::Plugin {
                message: String::from("worker returned no client identity"),
            }),
        }
    }

    /// Asks the worker to drop its host-service connection.
    ///
    /// Returns whether a connection was open.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardCallError::Rpc`] when the call does not complete.
    pub fn teardown(&self, ctx: &CallContext) -> Result<bool, ForwardCallError> {
        let response: TeardownResponse = self.rpc.call_typed(ctx, methods::TEARDOWN, &json!({}))?;
        Ok(response.disconnected)
    }

    /// Closes the control channel.
    pub fn close(&self) {
        self.rpc.close();
    }

    /// Returns `true` once the control channel is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.rpc.is_closed()
    }
}
