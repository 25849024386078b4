//! Caller side of an RPC channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::context::millis;
use super::{CallContext, Envelope, Fault};
use crate::broker::{Connection, lock};
use crate::error::{BrokerError, RpcError};

const CLIENT_TARGET: &str = "hst_broker::rpc::client";

/// Timeout applied to calls whose context has no earlier deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Granularity at which a waiting call notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);

type Reply = Result<Value, Fault>;

struct Inner {
    connection: Connection,
    pending: Mutex<HashMap<u64, Sender<Reply>>>,
    next_id: AtomicU64,
    reader_done: AtomicBool,
    timeout: Duration,
}

impl Inner {
    fn forget(&self, id: u64) {
        lock(&self.pending).remove(&id);
    }

    fn abandon(&self, id: u64) {
        self.forget(id);
        let cancel = serde_json::to_value(Envelope::Cancel { id });
        match cancel {
            Ok(payload) => {
                if let Err(err) = self.connection.send(payload) {
                    debug!(target: CLIENT_TARGET, id, error = %err, "cancel not delivered");
                }
            }
            Err(err) => warn!(target: CLIENT_TARGET, id, error = %err, "failed to encode cancel"),
        }
    }

    fn read_responses(&self) {
        while let Ok(payload) = self.connection.recv() {
            match serde_json::from_value::<Envelope>(payload) {
                Ok(Envelope::Response { id, result, fault }) => {
                    let reply = fault.map_or_else(|| Ok(result.unwrap_or(Value::Null)), Err);
                    let waiter = lock(&self.pending).remove(&id);
                    match waiter {
                        Some(sender) => {
                            if sender.send(reply).is_err() {
                                debug!(target: CLIENT_TARGET, id, "caller stopped waiting");
                            }
                        }
                        None => debug!(target: CLIENT_TARGET, id, "response to an abandoned call"),
                    }
                }
                Ok(Envelope::Request { id, .. } | Envelope::Cancel { id }) => warn!(
                    target: CLIENT_TARGET,
                    id,
                    channel = %self.connection.id(),
                    "ignoring inbound call on a client channel"
                ),
                Err(err) => warn!(target: CLIENT_TARGET, error = %err, "malformed envelope"),
            }
        }
        self.reader_done.store(true, Ordering::Release);
        lock(&self.pending).clear();
        debug!(target: CLIENT_TARGET, channel = %self.connection.id(), "client channel closed");
    }
}

/// Closes the connection once the last user handle is dropped, which in
/// turn stops the response reader.
struct Owner(Arc<Inner>);

impl Drop for Owner {
    fn drop(&mut self) {
        self.0.connection.close();
    }
}

/// Issues calls over one connection.
///
/// Calls may be made concurrently from any number of threads; responses
/// are matched to callers by request identifier. When the connection
/// closes, every outstanding call fails with
/// [`RpcError::ConnectionClosed`].
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
    _owner: Arc<Owner>,
}

impl RpcClient {
    /// Wraps `connection` with the default call timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Io`] if the response reader cannot be spawned.
    pub fn new(connection: Connection) -> Result<Self, BrokerError> {
        Self::with_timeout(connection, DEFAULT_CALL_TIMEOUT)
    }

    /// Wraps `connection`, capping every call at `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Io`] if the response reader cannot be spawned.
    pub fn with_timeout(connection: Connection, timeout: Duration) -> Result<Self, BrokerError> {
        let name = format!("hst-rpc-client-{}", connection.id());
        let inner = Arc::new(Inner {
            connection,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            reader_done: AtomicBool::new(false),
            timeout,
        });
        let reader = Arc::clone(&inner);
        thread::Builder::new()
            .name(name)
            .spawn(move || reader.read_responses())?;
        Ok(Self {
            _owner: Arc::new(Owner(Arc::clone(&inner))),
            inner,
        })
    }

    /// Calls `method` and waits for its result.
    ///
    /// The effective timeout is the earlier of the context deadline and the
    /// client's cap; it is forwarded to the handler as `deadline_ms`. If the
    /// context is cancelled or the timeout elapses, a cancel envelope is
    /// sent and the call fails.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Fault`] for remote failures,
    /// [`RpcError::Timeout`] and [`RpcError::Cancelled`] when the caller
    /// gives up, and transport-class errors when the connection fails.
    pub fn call(&self, ctx: &CallContext, method: &str, params: Value) -> Result<Value, RpcError> {
        ctx.check(method)?;
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = ctx
            .remaining()
            .map_or(inner.timeout, |left| left.min(inner.timeout));
        let metadata = ctx
            .metadata()
            .clone()
            .with_deadline_ms(Some(millis(timeout)));
        let request = serde_json::to_value(Envelope::Request {
            id,
            method: method.to_owned(),
            metadata,
            params,
        })
        .map_err(|err| RpcError::Encode {
            method: method.to_owned(),
            message: err.to_string(),
        })?;

        let (sender, receiver) = crossbeam_channel::bounded(1);
        lock(&inner.pending).insert(id, sender);
        if inner.reader_done.load(Ordering::Acquire) {
            inner.forget(id);
            return Err(RpcError::ConnectionClosed {
                method: method.to_owned(),
            });
        }
        if let Err(err) = inner.connection.send(request) {
            inner.forget(id);
            return Err(err.into());
        }

        let started = Instant::now();
        loop {
            let slice = CANCEL_POLL.min(timeout.saturating_sub(started.elapsed()));
            match receiver.recv_timeout(slice) {
                Ok(reply) => {
                    return reply.map_err(|fault| RpcError::Fault {
                        method: method.to_owned(),
                        code: fault.code(),
                        message: fault.message().to_owned(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RpcError::ConnectionClosed {
                        method: method.to_owned(),
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    if ctx.cancel_token().is_cancelled() {
                        inner.abandon(id);
                        return Err(RpcError::Cancelled {
                            method: method.to_owned(),
                        });
                    }
                    if started.elapsed() >= timeout {
                        inner.abandon(id);
                        return Err(RpcError::Timeout {
                            method: method.to_owned(),
                            timeout_ms: millis(timeout),
                        });
                    }
                }
            }
        }
    }

    /// Calls `method` with typed parameters and result.
    ///
    /// # Errors
    ///
    /// Same as [`Self::call`], plus [`RpcError::Encode`] and
    /// [`RpcError::Decode`] when the payloads do not serialize.
    pub fn call_typed<P, R>(&self, ctx: &CallContext, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let encoded = serde_json::to_value(params).map_err(|err| RpcError::Encode {
            method: method.to_owned(),
            message: err.to_string(),
        })?;
        let result = self.call(ctx, method, encoded)?;
        serde_json::from_value(result).map_err(|err| RpcError::Decode {
            method: method.to_owned(),
            message: err.to_string(),
        })
    }

    /// Closes the underlying connection.
    pub fn close(&self) {
        self.inner.connection.close();
    }

    /// Returns `true` once the connection is closed from either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.connection.is_closed() || self.inner.reader_done.load(Ordering::Acquire)
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("connection", &self.inner.connection)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}
