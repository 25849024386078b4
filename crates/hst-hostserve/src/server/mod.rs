//! RPC front end for [`HostServices`].
//!
//! The server reads the caller's identity from call metadata, never from
//! parameters. Calls without a client or request identifier are served and
//! logged as `unknown`; only stateful file handles insist on a client
//! identity, and report its absence as a capability failure.
//!
//! Each server is tied to one reverse connection through a
//! [`ClientBinding`]. The host sets the binding once it has registered the
//! identity the worker announced, and from then on file handles are only
//! reachable by calls naming that identity.

use std::fmt;
use std::sync::{Arc, OnceLock};

use hst_broker::rpc::{CallContext, Fault, RpcHandler, decode_params, encode_result, serve};
use hst_broker::Connection;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clients::ActiveClients;
use crate::error::HostServiceError;
use crate::ids::ClientId;
use crate::protocol::{
    GetEnvRequest, GetEnvResponse, HandleRequest, OpenFileRequest, OpenFileResponse, PathRequest,
    ReadDirResponse, ReadFileResponse, ReadHandleRequest, ReadHandleResponse, StatusResponse,
    WriteFileRequest, WriteHandleRequest, WriteHandleResponse, methods,
};
use crate::service::HostServices;


const SERVER_TARGET: &str = "hst_hostserve::server";

/// Label logged when a call carries no identity.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// The client identity owning one reverse connection.
///
/// Clones share the same slot, so the host can keep one half and hand the
/// other to the server before the identity is known. The slot is written
/// at most once.
#[derive(Clone, Debug, Default)]
pub struct ClientBinding {
    slot: Arc<OnceLock<ClientId>>,
}

impl ClientBinding {
    /// Creates an unbound slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a slot already bound to `client_id`.
    #[must_use]
    pub fn bound(client_id: ClientId) -> Self {
        Self {
            slot: Arc::new(OnceLock::from(client_id)),
        }
    }

    /// Binds the connection to `client_id`.
    ///
    /// Returns `false` if the connection was already bound; the first
    /// identity is kept.
    #[must_use]
    pub fn bind(&self, client_id: ClientId) -> bool {
        self.slot.set(client_id).is_ok()
    }

    /// Returns the bound identity, if any.
    #[must_use]
    pub fn client(&self) -> Option<ClientId> {
        self.slot.get().copied()
    }
}

/// Dispatches host-service calls for one reverse connection.
pub struct HostServiceServer {
    services: Arc<dyn HostServices>,
    binding: ClientBinding,
}

impl HostServiceServer {
    /// Creates a server over `services` for the connection owned by
    /// `binding`.
    #[must_use]
    pub const fn new(services: Arc<dyn HostServices>, binding: ClientBinding) -> Self {
        Self { services, binding }
    }

    /// The client owning this connection, once bound.
    #[must_use]
    pub fn client(&self) -> Option<ClientId> {
        self.binding.client()
    }

    /// Resolves the caller of a stateful call.
    ///
    /// The call must name a client, and that client must own the
    /// connection.
    fn caller(&self, ctx: &CallContext) -> Result<ClientId, HostServiceError> {
        let claimed = ctx
            .client_id()
            .and_then(|raw| raw.parse::<ClientId>().ok())
            .ok_or(HostServiceError::AnonymousClient)?;
        let owner = self
            .binding
            .client()
            .ok_or(HostServiceError::UnboundConnection)?;
        if claimed == owner {
            Ok(claimed)
        } else {
            warn!(
                target: SERVER_TARGET,
                client_id = %claimed,
                owner = %owner,
                "call names a client that does not own the connection"
            );
            Err(HostServiceError::ForeignClient { client_id: claimed })
        }
    }

    fn dispatch(&self, ctx: &CallContext, method: &str, params: Value) -> Result<Value, Fault> {
        let services = &self.services;
        match method {
            methods::GET_ENV => {
                let request: GetEnvRequest = decode_params(method, params)?;
                encode_result(&GetEnvResponse {
                    value: services.get_env(&request.key),
                })
            }
            methods::READ_DIR => {
                let request: PathRequest = decode_params(method, params)?;
                let response = services.read_dir(&request.path).map_or_else(
                    |err| ReadDirResponse {
                        entries: Vec::new(),
                        error: Some(report(ctx, method, &err)),
                    },
                    |entries| ReadDirResponse {
                        entries,
                        error: None,
                    },
                );
                encode_result(&response)
            }
            methods::READ_FILE => {
                let request: PathRequest = decode_params(method, params)?;
                let response = services.read_file(&request.path).map_or_else(
                    |err| ReadFileResponse {
                        contents: Vec::new(),
                        error: Some(report(ctx, method, &err)),
                    },
                    |contents| ReadFileResponse {
                        contents,
                        error: None,
                    },
                );
                encode_result(&response)
            }
            methods::WRITE_FILE => {
                let request: WriteFileRequest = decode_params(method, params)?;
                let outcome = services.write_file(&request.path, &request.contents, request.perm);
                encode_result(&status(ctx, method, outcome))
            }
            methods::OPEN_FILE => {
                let request: OpenFileRequest = decode_params(method, params)?;
                let outcome = self.caller(ctx)
                    .and_then(|client| services.open_file(client, &request.path, request.mode));
                let response = outcome.map_or_else(
                    |err| OpenFileResponse {
                        handle: None,
                        error: Some(report(ctx, method, &err)),
                    },
                    |handle| OpenFileResponse {
                        handle: Some(handle),
                        error: None,
                    },
                );
                encode_result(&response)
            }
            methods::READ_HANDLE => {
                let request: ReadHandleRequest = decode_params(method, params)?;
                let max_bytes = usize::try_from(request.max_bytes).unwrap_or(usize::MAX);
                let outcome = self.caller(ctx)
                    .and_then(|client| services.read_handle(client, request.handle, max_bytes));
                let response = outcome.map_or_else(
                    |err| ReadHandleResponse {
                        error: Some(report(ctx, method, &err)),
                        ..ReadHandleResponse::default()
                    },
                    |contents| ReadHandleResponse {
                        eof: contents.is_empty() && max_bytes > 0,
                        contents,
                        error: None,
                    },
                );
                encode_result(&response)
            }
            methods::WRITE_HANDLE => {
                let request: WriteHandleRequest = decode_params(method, params)?;
                let outcome = self.caller(ctx).and_then(|client| {
                    services.write_handle(client, request.handle, &request.contents)
                });
                let response = outcome.map_or_else(
                    |err| WriteHandleResponse {
                        written: 0,
                        error: Some(report(ctx, method, &err)),
                    },
                    |written| WriteHandleResponse {
                        written: u64::try_from(written).unwrap_or(u64::MAX),
                        error: None,
                    },
                );
                encode_result(&response)
            }
            methods::CLOSE_HANDLE => {
                let request: HandleRequest = decode_params(method, params)?;
                let outcome = self.caller(ctx)
                    .and_then(|client| services.close_handle(client, request.handle));
                encode_result(&status(ctx, method, outcome))
            }
            other => Err(Fault::unknown_method(other)),
        }
    }

    /// Releases the bound client's resources and drops it from `clients`.
    fn release(&self, clients: &ActiveClients) {
        let Some(client) = self.binding.client() else {
            debug!(target: SERVER_TARGET, "connection closed before it was bound");
            return;
        };
        let released = self.services.release_client(client);
        clients.remove(client);
        debug!(
            target: SERVER_TARGET,
            client_id = %client,
            released,
            "released client resources"
        );
    }
}

impl fmt::Debug for HostServiceServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServiceServer")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl RpcHandler for HostServiceServer {
    fn handle(&self, ctx: &CallContext, method: &str, params: Value) -> Result<Value, Fault> {
        debug!(
            target: SERVER_TARGET,
            client_id = ctx.client_id().unwrap_or(UNKNOWN_IDENTITY),
            request_id = ctx.request_id().unwrap_or(UNKNOWN_IDENTITY),
            method,
            "host service call"
        );
        self.dispatch(ctx, method, params)
    }
}

fn report(ctx: &CallContext, method: &str, err: &HostServiceError) -> String {
    debug!(
        target: SERVER_TARGET,
        client_id = ctx.client_id().unwrap_or(UNKNOWN_IDENTITY),
        request_id = ctx.request_id().unwrap_or(UNKNOWN_IDENTITY),
        method,
        error = %err,
        "host service call failed"
    );
    err.to_string()
}

fn status(ctx: &CallContext, method: &str, outcome: Result<(), HostServiceError>) -> StatusResponse {
    StatusResponse {
        error: outcome.err().map(|err| report(ctx, method, &err)),
    }
}

/// Serves host capabilities on `connection` until it closes.
///
/// Stateful calls are accepted only from the client `binding` names. When
/// the connection ends, every handle that client opened is released and
/// the client is dropped from `clients`.
pub fn serve_host_services(
    connection: Connection,
    services: Arc<dyn HostServices>,
    binding: ClientBinding,
    clients: &ActiveClients,
) {
    let channel = connection.id();
    info!(target: SERVER_TARGET, channel = %channel, "host services connected");
    let server = Arc::new(HostServiceServer::new(services, binding));
    let handler: Arc<dyn RpcHandler> = server.clone();
    serve(connection, &handler);
    server.release(clients);
    info!(target: SERVER_TARGET, channel = %channel, "host services disconnected");
}
