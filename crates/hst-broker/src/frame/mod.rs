//! Wire frames multiplexed over one session transport.
//!
//! Each frame is a single line of JSON. The `listener` field names the side
//! that owns the binding for the channel, which lets both peers allocate
//! identifiers from independent counters without colliding: a worker
//! channel 3 and a host channel 3 are different channels.
//!
//! ```json
//! {"listener":"worker","channel":0,"body":{"type":"open"}}
//! {"listener":"host","channel":4,"body":{"type":"data","payload":{"kind":"cancel","id":9}}}
//! ```

use std::fmt;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::BrokerError;


const FRAME_TARGET: &str = "hst_broker::frame";

/// Identifier of one logical channel within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u32);

impl ChannelId {
    /// Channel reserved for the worker's forward service.
    ///
    /// Allocators never hand this identifier out.
    pub const CONTROL: Self = Self(0);

    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One side of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The process that launched the worker.
    Host,
    /// The plugin process.
    Worker,
}

impl Role {
    /// Returns the opposite side of the session.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Host => Self::Worker,
            Self::Worker => Self::Host,
        }
    }

    /// Returns the wire spelling of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameBody {
    /// Dialer asks the listener to open the channel.
    Open,
    /// Listener accepted the dial.
    Accept,
    /// Listener refused the dial.
    Reject {
        /// Human-readable refusal reason.
        reason: String,
    },
    /// Application payload for an open channel.
    Data {
        /// Opaque JSON value.
        payload: Value,
    },
    /// Either side closed the channel.
    Close,
}

/// A single multiplexed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    listener: Role,
    channel: ChannelId,
    body: FrameBody,
}

impl Frame {
    /// Creates a frame addressed to `channel` as bound by `listener`.
    #[must_use]
    pub const fn new(listener: Role, channel: ChannelId, body: FrameBody) -> Self {
        Self {
            listener,
            channel,
            body,
        }
    }

    /// Returns the side owning the channel binding.
    #[must_use]
    pub const fn listener(&self) -> Role {
        self.listener
    }

    /// Returns the channel identifier.
    #[must_use]
    pub const fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Returns the frame body.
    #[must_use]
    pub const fn body(&self) -> &FrameBody {
        &self.body
    }

    /// Consumes the frame, returning its body.
    #[must_use]
    pub fn into_body(self) -> FrameBody {
        self.body
    }
}

/// Writes frames as newline-terminated JSON.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps a byte sink.
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encodes and flushes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Encode`] if the frame cannot be serialized and
    /// [`BrokerError::Io`] if the sink rejects the bytes.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), BrokerError> {
        let mut line = serde_json::to_vec(frame).map_err(|err| BrokerError::Encode {
            message: err.to_string(),
        })?;
        line.push(b'\n');
        self.inner.write_all(&line)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Returns the wrapped sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads newline-delimited frames, skipping lines that do not parse.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    line: Vec<u8>,
}

impl<R: BufRead> FrameReader<R> {
    /// Wraps a buffered byte source.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::new(),
        }
    }

    /// Reads the next well-formed frame.
    ///
    /// Blank and malformed lines, including lines that are not UTF-8, are
    /// logged and skipped. Returns `Ok(None)` once the source reaches end of
    /// file.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Io`] if reading from the source fails.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, BrokerError> {
        loop {
            self.line.clear();
            if self.inner.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            let trimmed = self.line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Frame>(trimmed) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => warn!(
                    target: FRAME_TARGET,
                    error = %err,
                    bytes = trimmed.len(),
                    "skipping malformed frame"
                ),
            }
        }
    }
}
