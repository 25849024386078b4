//! Session transport and logical channel broker for `hst` plugins.
//!
//! A host and one worker process share a single physical transport (the
//! worker's stdio pipes). The `hst-broker` crate turns that one pipe into an
//! unbounded number of independent, bidirectional logical channels so the
//! host can call into the worker and the worker can dial back into services
//! the host exposes.
//!
//! # Layers
//!
//! - [`handshake`]: protocol version, shared cookie and capability
//!   negotiation performed before any frame is trusted.
//! - [`frame`]: the JSONL wire frames multiplexed over the transport.
//! - [`broker`]: the [`Broker`] that allocates [`ChannelId`]s, binds
//!   listeners, dials peers and tears every channel down when the transport
//!   drops.
//! - [`rpc`]: request/response calls over one [`Connection`], with call
//!   metadata, deadlines and cancellation carried out of band.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::io::BufReader;
//! use std::os::unix::net::UnixStream;
//!
//! use hst_broker::{Broker, ChannelId, Role};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (host_end, worker_end) = UnixStream::pair()?;
//! let host = Broker::new(Role::Host, host_end.try_clone()?);
//! host.attach(BufReader::new(host_end))?;
//! let worker = Broker::new(Role::Worker, worker_end.try_clone()?);
//! worker.attach(BufReader::new(worker_end))?;
//!
//! let id = host.allocate()?;
//! host.listen(id, |connection| {
//!     while let Ok(payload) = connection.recv() {
//!         drop(connection.send(payload));
//!     }
//! })?;
//!
//! let connection = worker.dial(id)?;
//! connection.send(serde_json::json!({"ping": 1}))?;
//! assert_eq!(connection.recv()?, serde_json::json!({"ping": 1}));
//! assert_ne!(id, ChannelId::CONTROL);
//! # Ok(()) }
//! ```

pub mod broker;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod rpc;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

#[cfg(test)]
mod tests;

pub use self::broker::{Broker, BrokerConfig, ChannelAllocator, Connection};
pub use self::error::{BrokerError, HandshakeError, RpcError};
pub use self::frame::{ChannelId, Frame, FrameBody, Role};
pub use self::handshake::{Capabilities, Capability, HandshakeConfig, Hello};
pub use self::rpc::{CallContext, CallMetadata, CancelToken, Fault, FaultCode, RpcClient, RpcHandler};
