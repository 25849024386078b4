//! In-process sessions for tests in this and dependent crates.
//!
//! Enabled for this crate's own tests and, for other crates, through the
//! `test-support` feature.

use std::io::{self, BufReader};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;

use crate::broker::{Broker, BrokerConfig};
use crate::frame::Role;

/// A host broker and a worker broker joined by a socket pair.
#[derive(Debug)]
pub struct LinkedBrokers {
    host: Broker,
    worker: Broker,
    host_end: UnixStream,
    worker_end: UnixStream,
}

impl LinkedBrokers {
    /// Returns the host side.
    #[must_use]
    pub const fn host(&self) -> &Broker {
        &self.host
    }

    /// Returns the worker side.
    #[must_use]
    pub const fn worker(&self) -> &Broker {
        &self.worker
    }

    /// Cuts the transport in both directions, as if the worker died.
    ///
    /// # Errors
    ///
    /// Returns the socket error if either end was already shut down.
    pub fn sever(&self) -> io::Result<()> {
        self.host_end.shutdown(Shutdown::Both)?;
        self.worker_end.shutdown(Shutdown::Both)
    }
}

/// Builds a linked session with default tunables.
///
/// # Errors
///
/// Returns the operating system error if the socket pair or reader threads
/// cannot be created.
pub fn linked_brokers() -> io::Result<LinkedBrokers> {
    linked_brokers_with(BrokerConfig::default())
}

/// Builds a linked session with explicit tunables on both sides.
///
/// # Errors
///
/// Same as [`linked_brokers`].
pub fn linked_brokers_with(config: BrokerConfig) -> io::Result<LinkedBrokers> {
    let (host_end, worker_end) = UnixStream::pair()?;
    let host = Broker::with_config(Role::Host, host_end.try_clone()?, config);
    host.attach(BufReader::new(host_end.try_clone()?))?;
    let worker = Broker::with_config(Role::Worker, worker_end.try_clone()?, config);
    worker.attach(BufReader::new(worker_end.try_clone()?))?;
    Ok(LinkedBrokers {
        host,
        worker,
        host_end,
        worker_end,
    })
}
