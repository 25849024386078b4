//! Session negotiation between a host and a freshly launched worker.
//!
//! The host passes the shared cookie and its protocol version through the
//! worker's environment. A worker that does not find the expected cookie
//! refuses to start, so plugin binaries cannot be run by accident. A worker
//! that does find it writes one hello line to its stdout before any frame:
//!
//! ```json
//! {"protocol_version":1,"cookie":"<value>","capabilities":["host_services"]}
//! ```
//!
//! The host validates the hello and only then starts the broker.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

use crate::error::HandshakeError;


/// Environment variable carrying the host's protocol version.
pub const PROTOCOL_VERSION_ENV: &str = "HST_PLUGIN_PROTOCOL_VERSION";

/// Parameters both sides must agree on before a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    protocol_version: u32,
    magic_cookie_key: String,
    magic_cookie_value: String,
}

impl HandshakeConfig {
    /// Creates a handshake configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use hst_broker::HandshakeConfig;
    ///
    /// let config = HandshakeConfig::new(1, "TEST_KEY", "TEST_VALUE");
    /// assert_eq!(config.protocol_version(), 1);
    /// ```
    #[must_use]
    pub fn new(
        protocol_version: u32,
        magic_cookie_key: impl Into<String>,
        magic_cookie_value: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version,
            magic_cookie_key: magic_cookie_key.into(),
            magic_cookie_value: magic_cookie_value.into(),
        }
    }

    /// Returns the protocol version.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Returns the cookie environment variable name.
    #[must_use]
    pub fn magic_cookie_key(&self) -> &str {
        &self.magic_cookie_key
    }

    /// Returns the cookie value.
    #[must_use]
    pub fn magic_cookie_value(&self) -> &str {
        &self.magic_cookie_value
    }

    /// Environment entries the host sets on a worker it launches.
    #[must_use]
    pub fn environment(&self) -> Vec<(String, String)> {
        vec![
            (
                self.magic_cookie_key.clone(),
                self.magic_cookie_value.clone(),
            ),
            (
                PROTOCOL_VERSION_ENV.to_owned(),
                self.protocol_version.to_string(),
            ),
        ]
    }

    /// Verifies, from the worker side, that a host launched this process.
    ///
    /// `lookup` resolves environment variables; workers pass
    /// `|key| std::env::var(key).ok()`.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::MissingCookie`] or
    /// [`HandshakeError::CookieMismatch`] when the cookie is wrong, and
    /// [`HandshakeError::VersionMismatch`] when the host announced a
    /// different protocol version.
    pub fn verify_environment<F>(&self, lookup: F) -> Result<(), HandshakeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cookie =
            lookup(&self.magic_cookie_key).ok_or_else(|| HandshakeError::MissingCookie {
                key: self.magic_cookie_key.clone(),
            })?;
        if cookie != self.magic_cookie_value {
            return Err(HandshakeError::CookieMismatch);
        }
        if let Some(raw) = lookup(PROTOCOL_VERSION_ENV) {
            let actual = raw
                .trim()
                .parse::<u32>()
                .map_err(|err| HandshakeError::Malformed {
                    message: format!("{PROTOCOL_VERSION_ENV}='{raw}': {err}"),
                })?;
            self.check_version(actual)?;
        }
        Ok(())
    }

    /// Builds the hello a worker announces.
    #[must_use]
    pub fn hello(&self, capabilities: Capabilities) -> Hello {
        Hello {
            protocol_version: self.protocol_version,
            cookie: self.magic_cookie_value.clone(),
            capabilities,
        }
    }

    /// Validates, from the host side, the hello a worker announced.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::VersionMismatch`] or
    /// [`HandshakeError::CookieMismatch`].
    pub fn validate(&self, hello: &Hello) -> Result<(), HandshakeError> {
        self.check_version(hello.protocol_version)?;
        if hello.cookie != self.magic_cookie_value {
            return Err(HandshakeError::CookieMismatch);
        }
        Ok(())
    }

    const fn check_version(&self, actual: u32) -> Result<(), HandshakeError> {
        if actual == self.protocol_version {
            Ok(())
        } else {
            Err(HandshakeError::VersionMismatch {
                expected: self.protocol_version,
                actual,
            })
        }
    }
}

/// Optional feature a worker can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// The worker accepts a reverse channel to host services.
    HostServices,
}

/// Set of capabilities advertised in a hello.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(Vec<Capability>);

impl Capabilities {
    /// Returns an empty capability set.
    #[must_use]
    pub const fn none() -> Self {
        Self(Vec::new())
    }

    /// Adds a capability, ignoring duplicates.
    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        if !self.0.contains(&capability) {
            self.0.push(capability);
        }
        self
    }

    /// Returns `true` if the capability is advertised.
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Iterates over the advertised capabilities.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

/// First line a worker writes to its stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    protocol_version: u32,
    cookie: String,
    #[serde(default)]
    capabilities: Capabilities,
}

impl Hello {
    /// Returns the announced protocol version.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Returns the announced capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}

/// Writes a hello line and flushes it.
///
/// # Errors
///
/// Returns [`HandshakeError::Malformed`] if the hello cannot be encoded and
/// [`HandshakeError::Io`] if the write fails.
pub fn write_hello<W: Write + ?Sized>(writer: &mut W, hello: &Hello) -> Result<(), HandshakeError> {
    let mut line = serde_json::to_vec(hello).map_err(|err| HandshakeError::Malformed {
        message: err.to_string(),
    })?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Reads and parses one hello line.
///
/// # Errors
///
/// Returns [`HandshakeError::Eof`] if the source closes first,
/// [`HandshakeError::Malformed`] if the line is not a hello and
/// [`HandshakeError::Io`] if reading fails.
pub fn read_hello<R: BufRead + ?Sized>(reader: &mut R) -> Result<Hello, HandshakeError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(HandshakeError::Eof);
    }
    serde_json::from_str(line.trim()).map_err(|err| HandshakeError::Malformed {
        message: err.to_string(),
    })
}
