//! Logical channel broker for one session.
//!
//! A [`Broker`] owns the writing half of the session transport and routes
//! frames read from the other half to the right [`Connection`]. Either side
//! can [`allocate`](Broker::allocate) an identifier, [`listen`](Broker::listen)
//! on it, and hand it to the peer out of band; the peer then
//! [`dial`](Broker::dial)s it.
//!
//! Binding policy: each listener serves exactly one dial. A dial to an
//! identifier nobody listens on is rejected with reason `"not bound"`, and a
//! second dial to a consumed identifier with `"already dialed"`.
//!
//! When the transport reaches end of file or fails, the session shuts down:
//! every open connection, pending dial and unanswered listener observes
//! [`BrokerError::SessionClosed`].

mod allocator;
mod connection;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use self::allocator::ChannelAllocator;
pub use self::connection::Connection;
use crate::error::{BrokerError, REASON_ALREADY_DIALED, REASON_NOT_BOUND};
use crate::frame::{ChannelId, Frame, FrameBody, FrameReader, FrameWriter, Role};


const BROKER_TARGET: &str = "hst_broker::broker";

/// Default time a dial waits for the listener's answer.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a [`Broker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    dial_timeout: Duration,
}

impl BrokerConfig {
    /// Overrides the dial timeout.
    #[must_use]
    pub const fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    /// Returns the dial timeout.
    #[must_use]
    pub const fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

/// Handler run on its own thread when a dial to a bound channel arrives.
type ChannelHandler = Box<dyn FnOnce(Connection) + Send + 'static>;

/// Routing key: identifiers are only unique per listening side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ChannelKey {
    listener: Role,
    id: ChannelId,
}

enum DialOutcome {
    Accepted,
    Rejected(String),
}

#[derive(Default)]
struct Bindings {
    pending: HashMap<ChannelId, ChannelHandler>,
    consumed: HashSet<ChannelId>,
}

struct Shared {
    role: Role,
    config: BrokerConfig,
    allocator: ChannelAllocator,
    sink: Mutex<Option<FrameWriter<Box<dyn Write + Send>>>>,
    bindings: Mutex<Bindings>,
    channels: RwLock<HashMap<ChannelKey, Sender<Value>>>,
    dials: Mutex<HashMap<ChannelId, Sender<DialOutcome>>>,
    closed: Mutex<Option<String>>,
    closed_changed: Condvar,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_live(&self) -> bool {
        lock(&self.closed).is_none()
    }

    fn send_frame(&self, frame: &Frame) -> Result<(), BrokerError> {
        let result = {
            let mut sink = lock(&self.sink);
            match sink.as_mut() {
                Some(writer) => writer.write_frame(frame),
                None => Err(BrokerError::SessionClosed),
            }
        };
        if let Err(BrokerError::Io { source }) = &result {
            self.shutdown(&format!("transport write failed: {source}"));
        }
        result
    }

    fn register_channel(&self, key: ChannelKey, sender: Sender<Value>) -> bool {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if channels.contains_key(&key) {
            return false;
        }
        channels.insert(key, sender);
        true
    }

    fn forget_channel(&self, key: ChannelKey) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }

    fn deliver(&self, key: ChannelKey, payload: Value) {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        match channels.get(&key) {
            Some(sender) => {
                if sender.send(payload).is_err() {
                    debug!(target: BROKER_TARGET, channel = %key.id, "receiver gone; payload dropped");
                }
            }
            None => debug!(
                target: BROKER_TARGET,
                channel = %key.id,
                listener = %key.listener,
                "payload for unknown channel dropped"
            ),
        }
    }

    fn route(self: &Arc<Self>, frame: Frame) {
        let key = ChannelKey {
            listener: frame.listener(),
            id: frame.channel(),
        };
        let local = key.listener == self.role;
        match (local, frame.into_body()) {
            (true, FrameBody::Open) => self.accept_inbound(key.id),
            (false, FrameBody::Accept) => self.complete_dial(key.id, DialOutcome::Accepted),
            (false, FrameBody::Reject { reason }) => {
                self.complete_dial(key.id, DialOutcome::Rejected(reason));
            }
            (_, FrameBody::Data { payload }) => self.deliver(key, payload),
            (_, FrameBody::Close) => {
                debug!(target: BROKER_TARGET, channel = %key.id, listener = %key.listener, "peer closed channel");
                self.forget_channel(key);
            }
            (_, FrameBody::Open | FrameBody::Accept | FrameBody::Reject { .. }) => warn!(
                target: BROKER_TARGET,
                channel = %key.id,
                listener = %key.listener,
                "ignoring control frame addressed to the wrong side"
            ),
        }
    }

    fn take_handler(&self, id: ChannelId) -> Result<ChannelHandler, &'static str> {
        let mut bindings = lock(&self.bindings);
        match bindings.pending.remove(&id) {
            Some(handler) => {
                bindings.consumed.insert(id);
                Ok(handler)
            }
            None if bindings.consumed.contains(&id) => Err(REASON_ALREADY_DIALED),
            None => Err(REASON_NOT_BOUND),
        }
    }

    fn accept_inbound(self: &Arc<Self>, id: ChannelId) {
        let handler = match self.take_handler(id) {
            Ok(handler) => handler,
            Err(reason) => {
                debug!(target: BROKER_TARGET, channel = %id, reason, "rejecting dial");
                let reject = Frame::new(
                    self.role,
                    id,
                    FrameBody::Reject {
                        reason: reason.to_owned(),
                    },
                );
                if let Err(err) = self.send_frame(&reject) {
                    warn!(target: BROKER_TARGET, channel = %id, error = %err, "reject not delivered");
                }
                return;
            }
        };

        let key = ChannelKey {
            listener: self.role,
            id,
        };
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.register_channel(key, sender);
        let connection = Connection::new(key, receiver, Arc::clone(self));
        if let Err(err) = self.send_frame(&Frame::new(self.role, id, FrameBody::Accept)) {
            warn!(target: BROKER_TARGET, channel = %id, error = %err, "accept not delivered");
            return;
        }
        let spawned = thread::Builder::new()
            .name(format!("hst-channel-{id}"))
            .spawn(move || handler(connection));
        if let Err(err) = spawned {
            warn!(target: BROKER_TARGET, channel = %id, error = %err, "failed to start channel handler");
        }
    }

    fn complete_dial(&self, id: ChannelId, outcome: DialOutcome) {
        let waiting = lock(&self.dials).remove(&id);
        match waiting {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    debug!(target: BROKER_TARGET, channel = %id, "dialer stopped waiting");
                }
            }
            None => {
                warn!(target: BROKER_TARGET, channel = %id, "answer for a dial nobody is waiting on");
                if matches!(outcome, DialOutcome::Accepted) {
                    let close = Frame::new(self.role.peer(), id, FrameBody::Close);
                    if let Err(err) = self.send_frame(&close) {
                        debug!(target: BROKER_TARGET, channel = %id, error = %err, "close frame not delivered");
                    }
                }
            }
        }
    }

    fn shutdown(&self, reason: &str) {
        {
            let mut closed = lock(&self.closed);
            if closed.is_some() {
                return;
            }
            *closed = Some(reason.to_owned());
        }
        info!(target: BROKER_TARGET, role = %self.role, reason, "session closed");
        *lock(&self.sink) = None;
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        lock(&self.dials).clear();
        lock(&self.bindings).pending.clear();
        self.closed_changed.notify_all();
    }
}

/// Multiplexes logical channels over one session transport.
///
/// Cloning a broker yields another handle to the same session.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<Shared>,
}

impl Broker {
    /// Creates a broker for `role` writing frames to `sink`.
    ///
    /// The broker does not route inbound frames until [`Self::attach`] is
    /// called with the reading half of the transport.
    pub fn new<W>(role: Role, sink: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self::with_config(role, sink, BrokerConfig::default())
    }

    /// Creates a broker with explicit tunables.
    pub fn with_config<W>(role: Role, sink: W, config: BrokerConfig) -> Self
    where
        W: Write + Send + 'static,
    {
        let writer: Box<dyn Write + Send> = Box::new(sink);
        Self {
            shared: Arc::new(Shared {
                role,
                config,
                allocator: ChannelAllocator::new(),
                sink: Mutex::new(Some(FrameWriter::new(writer))),
                bindings: Mutex::new(Bindings::default()),
                channels: RwLock::new(HashMap::new()),
                dials: Mutex::new(HashMap::new()),
                closed: Mutex::new(None),
                closed_changed: Condvar::new(),
            }),
        }
    }

    /// Starts the reader thread routing frames from `source`.
    ///
    /// The thread exits, shutting the session down, when `source` reaches
    /// end of file or fails.
    ///
    /// # Errors
    ///
    /// Returns the operating system error if the thread cannot be spawned.
    pub fn attach<R>(&self, source: R) -> io::Result<JoinHandle<()>>
    where
        R: BufRead + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("hst-{}-reader", shared.role))
            .spawn(move || read_loop(&shared, source))
    }

    /// Returns the side this broker speaks for.
    #[must_use]
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Returns a fresh channel identifier, unique for this session side.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Exhausted`] when no identifiers remain.
    pub fn allocate(&self) -> Result<ChannelId, BrokerError> {
        self.shared.allocator.allocate()
    }

    /// Binds `handler` to channel `id`.
    ///
    /// The handler runs on a dedicated thread once the peer dials `id`; it
    /// never runs if nobody dials or the session closes first.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AlreadyBound`] if `id` already has a listener
    /// or has been consumed by a dial, and [`BrokerError::SessionClosed`]
    /// if the session is down.
    pub fn listen<F>(&self, id: ChannelId, handler: F) -> Result<(), BrokerError>
    where
        F: FnOnce(Connection) + Send + 'static,
    {
        if !self.shared.is_live() {
            return Err(BrokerError::SessionClosed);
        }
        let mut bindings = lock(&self.shared.bindings);
        if bindings.pending.contains_key(&id) || bindings.consumed.contains(&id) {
            return Err(BrokerError::AlreadyBound { id });
        }
        bindings.pending.insert(id, Box::new(handler));
        debug!(target: BROKER_TARGET, role = %self.shared.role, channel = %id, "listening");
        Ok(())
    }

    /// Dials channel `id` bound by the peer.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotBound`] if the peer rejects the dial,
    /// [`BrokerError::DialTimeout`] if it does not answer in time,
    /// [`BrokerError::DialInProgress`] if another dial to `id` is pending,
    /// and [`BrokerError::SessionClosed`] if the session is down.
    pub fn dial(&self, id: ChannelId) -> Result<Connection, BrokerError> {
        let shared = &self.shared;
        let key = ChannelKey {
            listener: shared.role.peer(),
            id,
        };
        if !shared.is_live() {
            return Err(BrokerError::SessionClosed);
        }

        let (outcome_tx, outcome_rx) = crossbeam_channel::bounded(1);
        {
            let mut dials = lock(&shared.dials);
            if dials.contains_key(&id) {
                return Err(BrokerError::DialInProgress { id });
            }
            dials.insert(id, outcome_tx);
        }
        let (data_tx, data_rx) = crossbeam_channel::unbounded();
        if !shared.register_channel(key, data_tx) {
            lock(&shared.dials).remove(&id);
            return Err(BrokerError::NotBound {
                listener: key.listener,
                id,
                reason: REASON_ALREADY_DIALED.to_owned(),
            });
        }
        let abandon = |err: BrokerError| {
            lock(&shared.dials).remove(&id);
            shared.forget_channel(key);
            err
        };
        if !shared.is_live() {
            return Err(abandon(BrokerError::SessionClosed));
        }
        shared
            .send_frame(&Frame::new(key.listener, id, FrameBody::Open))
            .map_err(abandon)?;

        let timeout = shared.config.dial_timeout;
        match outcome_rx.recv_timeout(timeout) {
            Ok(DialOutcome::Accepted) => {
                debug!(target: BROKER_TARGET, channel = %id, "dial accepted");
                Ok(Connection::new(key, data_rx, Arc::clone(shared)))
            }
            Ok(DialOutcome::Rejected(reason)) => Err(abandon(BrokerError::NotBound {
                listener: key.listener,
                id,
                reason,
            })),
            Err(RecvTimeoutError::Timeout) => Err(abandon(BrokerError::DialTimeout {
                id,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })),
            Err(RecvTimeoutError::Disconnected) => Err(abandon(BrokerError::SessionClosed)),
        }
    }

    /// Returns `true` while the transport is up.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.shared.is_live()
    }

    /// Returns why the session closed, if it has.
    #[must_use]
    pub fn close_reason(&self) -> Option<String> {
        lock(&self.shared.closed).clone()
    }

    /// Closes the session and every channel in it.
    ///
    /// Dropping the transport's writing half lets the peer observe end of
    /// file. Calling this more than once is a no-op.
    pub fn shutdown(&self, reason: &str) {
        self.shared.shutdown(reason);
    }

    /// Blocks until the session closes.
    pub fn wait_closed(&self) {
        let mut closed = lock(&self.shared.closed);
        while closed.is_none() {
            closed = self
                .shared
                .closed_changed
                .wait(closed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the session closes or `timeout` elapses.
    ///
    /// Returns `true` if the session closed.
    #[must_use]
    pub fn wait_closed_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut closed = lock(&self.shared.closed);
        while closed.is_none() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            closed = self
                .shared
                .closed_changed
                .wait_timeout(closed, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("role", &self.shared.role)
            .field("live", &self.shared.is_live())
            .finish_non_exhaustive()
    }
}

fn read_loop<R: BufRead>(shared: &Arc<Shared>, source: R) {
    let mut frames = FrameReader::new(source);
    loop {
        match frames.read_frame() {
            Ok(Some(frame)) => shared.route(frame),
            Ok(None) => {
                shared.shutdown("peer closed the transport");
                return;
            }
            Err(err) => {
                shared.shutdown(&format!("transport read failed: {err}"));
                return;
            }
        }
        if !shared.is_live() {
            return;
        }
    }
}
