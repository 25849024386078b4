//! Plugin workers for the host: launching, supervising and connecting them.
//!
//! A plugin is a separate executable the host starts as a child process.
//! The two sides agree on a protocol version and a shared cookie, then
//! multiplex logical channels over the worker's stdin and stdout with
//! [`hst_broker`]. Two kinds of channel matter here:
//!
//! - the **forward** control channel, on which the host calls the worker's
//!   business surface ([`FileListerClient`] on the host, [`FileLister`] on
//!   the worker);
//! - a **reverse** channel per worker, which the host binds to its
//!   capability server and the worker dials back to reach host services
//!   ([`HostServiceRegistry`] on the host, [`ReverseConnection`] on the
//!   worker).
//!
//! # Host side
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use hst_broker::CallContext;
//! use hst_hostserve::{HostCapabilities, Sandbox};
//! use hst_plugins::{HostServiceRegistry, PluginLauncher, PluginManifest, handshake_config};
//!
//! let sandbox = Sandbox::open("/srv/data").expect("sandbox root");
//! let registry = HostServiceRegistry::new(Arc::new(HostCapabilities::new(sandbox)));
//! let launcher = PluginLauncher::new(handshake_config());
//! let manifest = PluginManifest::for_executable(PathBuf::from("/usr/bin/hst-plugin-filelister"));
//!
//! let session = launcher.launch(&manifest).expect("plugin starts");
//! let lister = session.dispense().expect("control channel");
//! let ctx = CallContext::background();
//! let client = registry.establish(&ctx, &session, &lister).expect("host services");
//! let entries = lister.list(&ctx, ".").expect("listing");
//! registry.disconnect(&ctx, &session, &lister, client);
//! ```

pub mod error;
pub mod filelister;
pub mod manifest;
pub mod process;
pub mod registry;
pub mod reverse;
pub mod services;
pub mod session;
pub mod worker;

#[cfg(test)]
mod tests;

pub use self::error::{
    EstablishError, ForwardCallError, ListingError, PluginError, ReverseConnectionError,
    WorkerError,
};
pub use self::filelister::{FileLister, FileListerClient, FileListerServer};
pub use self::manifest::PluginManifest;
pub use self::process::PluginLauncher;
pub use self::registry::PluginRegistry;
pub use self::reverse::ReverseConnection;
pub use self::services::HostServiceRegistry;
pub use self::session::{PluginPeer, PluginSession};
pub use self::worker::Worker;

use hst_broker::HandshakeConfig;

/// Protocol version spoken by this host and its workers.
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the shared cookie.
pub const MAGIC_COOKIE_KEY: &str = "HST_PLUGIN_MAGIC_COOKIE";

/// Shared cookie value; a worker refuses to run without it.
pub const MAGIC_COOKIE_VALUE: &str = "d5a1c0f2-file-lister";

/// Handshake settings shared by the host and every bundled worker.
#[must_use]
pub fn handshake_config() -> HandshakeConfig {
    HandshakeConfig::new(PROTOCOL_VERSION, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
}
