//! Handler side of an RPC channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::Value;
use tracing::{debug, warn};

use super::{CallContext, CancelToken, Envelope, Fault, FaultCode};
use crate::broker::{Connection, lock};

const SERVER_TARGET: &str = "hst_broker::rpc::server";

/// Serves calls arriving on a channel.
///
/// Implementations are shared across the threads that run concurrent
/// requests.
pub trait RpcHandler: Send + Sync {
    /// Handles one call.
    ///
    /// Long-running handlers should poll [`CallContext::is_done`] and stop
    /// once the caller has cancelled or the deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns a [`Fault`] that is sent back to the caller.
    fn handle(&self, ctx: &CallContext, method: &str, params: Value) -> Result<Value, Fault>;
}

type InFlight = Arc<Mutex<HashMap<u64, CancelToken>>>;

#[derive(Clone)]
struct Dispatcher {
    connection: Arc<Connection>,
    handler: Arc<dyn RpcHandler>,
    in_flight: InFlight,
}

impl Dispatcher {
    fn dispatch(&self, id: u64, method: String, params: Value, ctx: CallContext) {
        lock(&self.in_flight).insert(id, ctx.cancel_token().clone());
        let worker = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("hst-rpc-{id}"))
            .spawn(move || {
                let outcome = if ctx.is_done() {
                    Err(Fault::new(FaultCode::Cancelled, "call abandoned before it started"))
                } else {
                    worker.handler.handle(&ctx, &method, params)
                };
                lock(&worker.in_flight).remove(&id);
                respond(&worker.connection, id, outcome);
            });
        if let Err(err) = spawned {
            warn!(target: SERVER_TARGET, id, error = %err, "failed to start request thread");
            lock(&self.in_flight).remove(&id);
            respond(
                &self.connection,
                id,
                Err(Fault::internal(format!("failed to start request: {err}"))),
            );
        }
    }

    fn cancel(&self, id: u64) {
        if let Some(token) = lock(&self.in_flight).get(&id) {
            debug!(target: SERVER_TARGET, id, "caller cancelled request");
            token.cancel();
        }
    }
}

fn respond(connection: &Connection, id: u64, outcome: Result<Value, Fault>) {
    let (result, fault) = match outcome {
        Ok(value) => (Some(value), None),
        Err(fault) => (None, Some(fault)),
    };
    match serde_json::to_value(Envelope::Response { id, result, fault }) {
        Ok(payload) => {
            if let Err(err) = connection.send(payload) {
                debug!(target: SERVER_TARGET, id, error = %err, "response not delivered");
            }
        }
        Err(err) => warn!(target: SERVER_TARGET, id, error = %err, "failed to encode response"),
    }
}

/// Runs the request loop for `channel` until it closes.
///
/// Each request runs on its own thread with a context rebuilt from the
/// request metadata. When the channel closes, every request still running
/// observes cancellation.
pub fn serve(channel: Connection, handler: &Arc<dyn RpcHandler>) {
    let dispatcher = Dispatcher {
        connection: Arc::new(channel),
        handler: Arc::clone(handler),
        in_flight: Arc::default(),
    };
    let session = CancelToken::new();
    while let Ok(payload) = dispatcher.connection.recv() {
        match serde_json::from_value::<Envelope>(payload) {
            Ok(Envelope::Request {
                id,
                method,
                metadata,
                params,
            }) => {
                let ctx = CallContext::from_metadata(metadata, session.child());
                dispatcher.dispatch(id, method, params, ctx);
            }
            Ok(Envelope::Cancel { id }) => dispatcher.cancel(id),
            Ok(Envelope::Response { id, .. }) => warn!(
                target: SERVER_TARGET,
                id,
                "ignoring response on a served channel"
            ),
            Err(err) => warn!(target: SERVER_TARGET, error = %err, "malformed envelope"),
        }
    }
    session.cancel();
    debug!(
        target: SERVER_TARGET,
        channel = %dispatcher.connection.id(),
        "served channel closed"
    );
}
