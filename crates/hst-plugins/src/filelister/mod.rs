//! The forward business surface: the host asks a worker to list a
//! directory.
//!
//! Besides `list`, the surface carries the two lifecycle calls the host
//! uses to hand a worker its host-service channel and to take it back:
//!
//! ```json
//! {"kind":"request","id":1,"method":"file_lister.notify_host_service_channel","params":{"channel":1}}
//! {"kind":"response","id":1,"result":{"client_id":"0190..."}}
//! ```
//!
//! Listing failures travel inside the response as an `error` string, like
//! host capability failures do.

use hst_broker::{CallContext, ChannelId};
use hst_hostserve::{ClientId, HostServiceClient};
use serde::{Deserialize, Serialize};

use crate::error::ListingError;

mod client;
mod server;


pub use self::client::FileListerClient;
pub use self::server::FileListerServer;

/// Method names of the forward surface.
pub mod methods {
    /// Lists a directory.
    pub const LIST: &str = "file_lister.list";
    /// Hands the worker a host-service channel to dial.
    pub const NOTIFY_HOST_SERVICE_CHANNEL: &str = "file_lister.notify_host_service_channel";
    /// Asks the worker to drop its host-service connection.
    pub const TEARDOWN: &str = "file_lister.teardown";
}

/// Parameters of `file_lister.list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    /// Directory to list, relative to the host's sandbox root.
    pub directory: String,
}

/// Result of `file_lister.list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Rendered entries.
    #[serde(default)]
    pub entries: Vec<String>,
    /// Listing failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parameters of `file_lister.notify_host_service_channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRequest {
    /// Channel the host bound its services to.
    pub channel: ChannelId,
}

/// Result of `file_lister.notify_host_service_channel`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResponse {
    /// Identity the worker minted for the new connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Dial failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `file_lister.teardown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownResponse {
    /// Whether a host-service connection was open.
    pub disconnected: bool,
}

/// Business logic of a file-listing worker.
pub trait FileLister: Send + Sync {
    /// Lists `directory`, normally by calling back into `host`.
    ///
    /// `host` is `None` until the host has connected host services.
    ///
    /// # Errors
    ///
    /// Returns a [`ListingError`] that is reported to the host as data.
    fn list(
        &self,
        ctx: &CallContext,
        host: Option<&HostServiceClient>,
        directory: &str,
    ) -> Result<Vec<String>, ListingError>;
}
