//! Worker-side dispatcher for the forward surface.

use std::sync::Arc;

use hst_broker::rpc::{Fault, FaultCode, RpcHandler, decode_params, encode_result};
use hst_broker::CallContext;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    FileLister, ListRequest, ListResponse, NotifyRequest, NotifyResponse, TeardownResponse,
    methods,
};
use crate::reverse::ReverseConnection;

const LISTER_TARGET: &str = "hst_plugins::filelister";

/// Serves the forward surface on the control channel.
pub struct FileListerServer {
    lister: Arc<dyn FileLister>,
    reverse: Arc<ReverseConnection>,
}

impl FileListerServer {
    /// Creates a server running `lister`, reaching host services through
    /// `reverse`.
    #[must_use]
    pub fn new(lister: Arc<dyn FileLister>, reverse: Arc<ReverseConnection>) -> Self {
        Self { lister, reverse }
    }

    fn list(&self, ctx: &CallContext, request: &ListRequest) -> ListResponse {
        let host = self.reverse.client();
        self.lister
            .list(ctx, host.as_ref(), &request.directory)
            .map_or_else(
                |err| {
                    debug!(
                        target: LISTER_TARGET,
                        directory = %request.directory,
                        error = %err,
                        "listing failed"
                    );
                    ListResponse {
                        entries: Vec::new(),
                        error: Some(err.to_string()),
                    }
                },
                |entries| ListResponse {
                    entries,
                    error: None,
                },
            )
    }

    /// Dials the announced channel unless the host has already given up
    /// on the call.
    ///
    /// A connection made while the call was being abandoned is closed
    /// again, so the worker never holds a channel the host stopped waiting
    /// for.
    fn notify(&self, ctx: &CallContext, request: NotifyRequest) -> Result<NotifyResponse, Fault> {
        if ctx.is_done() {
            return Err(abandoned(request, "before dialing"));
        }
        let outcome = self.reverse.connect(request.channel);
        if ctx.is_done() {
            if let Ok(client_id) = outcome {
                self.reverse.disconnect();
                debug!(
                    target: LISTER_TARGET,
                    channel = %request.channel,
                    client_id = %client_id,
                    "dropped connection of an abandoned notify"
                );
            }
            return Err(abandoned(request, "while dialing"));
        }
        Ok(outcome.map_or_else(
            |err| {
                warn!(
                    target: LISTER_TARGET,
                    channel = %request.channel,
                    error = %err,
                    "could not connect host services"
                );
                NotifyResponse {
                    client_id: None,
                    error: Some(err.to_string()),
                }
            },
            |client_id| NotifyResponse {
                client_id: Some(client_id),
                error: None,
            },
        ))
    }
}

fn abandoned(request: NotifyRequest, stage: &str) -> Fault {
    debug!(target: LISTER_TARGET, channel = %request.channel, stage, "notify abandoned");
    Fault::new(
        FaultCode::Cancelled,
        format!("notify for channel {} abandoned {stage}", request.channel),
    )
}

impl std::fmt::Debug for FileListerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileListerServer")
            .field("reverse", &self.reverse)
            .finish_non_exhaustive()
    }
}

impl RpcHandler for FileListerServer {
    fn handle(&self, ctx: &CallContext, method: &str, params: Value) -> Result<Value, Fault> {
        match method {
            methods::LIST => {
                let request: ListRequest = decode_params(method, params)?;
                encode_result(&self.list(ctx, &request))
            }
            methods::NOTIFY_HOST_SERVICE_CHANNEL => {
                let request: NotifyRequest = decode_params(method, params)?;
                encode_result(&self.notify(ctx, request)?)
            }
            methods::TEARDOWN => encode_result(&TeardownResponse {
                disconnected: self.reverse.disconnect().is_some(),
            }),
            other => Err(Fault::unknown_method(other)),
        }
    }
}
