//! Request/response calls over a single logical channel.
//!
//! Every message on an RPC channel is an [`Envelope`]. Requests carry
//! [`CallMetadata`] out of band from their parameters: the caller's client
//! and request identifiers and the remaining deadline. A caller that gives
//! up sends a `cancel` envelope so the handler can stop early.
//!
//! ```json
//! {"kind":"request","id":1,"method":"host.get_env","metadata":{"client_id":"...","request_id":"...","deadline_ms":29950},"params":{"key":"HOME"}}
//! {"kind":"response","id":1,"result":{"value":"/home/me"}}
//! {"kind":"cancel","id":1}
//! ```

mod client;
mod context;
mod server;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::client::{DEFAULT_CALL_TIMEOUT, RpcClient};
pub use self::context::{CallContext, CancelToken};
pub use self::server::{RpcHandler, serve};


/// Out-of-band identity and deadline information for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deadline_ms: Option<u64>,
}

impl CallMetadata {
    /// Returns empty metadata.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            client_id: None,
            request_id: None,
            deadline_ms: None,
        }
    }

    /// Sets the caller's client identifier.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the per-call request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Sets the remaining deadline in milliseconds.
    #[must_use]
    pub const fn with_deadline_ms(mut self, deadline_ms: Option<u64>) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    /// Returns the caller's client identifier.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Returns the request identifier.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Returns the remaining deadline in milliseconds.
    #[must_use]
    pub const fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }
}

/// Classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// The method is not served on this channel.
    UnknownMethod,
    /// The parameters did not match the method's schema.
    InvalidParams,
    /// The handler stopped because the caller cancelled.
    Cancelled,
    /// The handler failed.
    Internal,
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnknownMethod => "unknown_method",
            Self::InvalidParams => "invalid_params",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        })
    }
}

/// Failure answer produced by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    code: FaultCode,
    message: String,
}

impl Fault {
    /// Creates a fault.
    #[must_use]
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Fault for a method the handler does not serve.
    #[must_use]
    pub fn unknown_method(method: &str) -> Self {
        Self::new(FaultCode::UnknownMethod, format!("unknown method '{method}'"))
    }

    /// Fault for a handler that failed.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Internal, message)
    }

    /// Returns the classification.
    #[must_use]
    pub const fn code(&self) -> FaultCode {
        self.code
    }

    /// Returns the description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One message on an RPC channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    /// A call.
    Request {
        /// Caller-assigned identifier, unique per channel.
        id: u64,
        /// Method name.
        method: String,
        /// Identity and deadline information.
        #[serde(default)]
        metadata: CallMetadata,
        /// Method parameters.
        #[serde(default)]
        params: Value,
    },
    /// The answer to a call.
    Response {
        /// Identifier of the answered request.
        id: u64,
        /// Successful result.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Failure, if the handler failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fault: Option<Fault>,
    },
    /// The caller no longer wants the answer.
    Cancel {
        /// Identifier of the abandoned request.
        id: u64,
    },
}

/// Decodes method parameters inside a handler.
///
/// # Errors
///
/// Returns a [`FaultCode::InvalidParams`] fault when `params` does not
/// match `P`.
pub fn decode_params<P: DeserializeOwned>(method: &str, params: Value) -> Result<P, Fault> {
    serde_json::from_value(params).map_err(|err| {
        Fault::new(
            FaultCode::InvalidParams,
            format!("invalid parameters for '{method}': {err}"),
        )
    })
}

/// Encodes a handler result.
///
/// # Errors
///
/// Returns an internal fault if `result` cannot be serialized.
pub fn encode_result<R: Serialize>(result: &R) -> Result<Value, Fault> {
    serde_json::to_value(result).map_err(|err| Fault::internal(format!("failed to encode result: {err}")))
}
