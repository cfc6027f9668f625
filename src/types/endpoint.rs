//! Transport endpoint addresses

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{Result, StreamError};

/// Default port for the frame stream.
pub const DEFAULT_PORT: u16 = 5555;

/// Host token meaning "every local interface" when binding.
pub const WILDCARD_HOST: &str = "*";

/// A `tcp://<host>:<port>` transport address.
///
/// Publishers bind it (`*` binds all interfaces); subscribers connect to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Default publisher endpoint, `tcp://*:5555`
    pub fn default_bind() -> Self {
        Self::new(WILDCARD_HOST, DEFAULT_PORT)
    }

    /// Default subscriber endpoint, `tcp://localhost:5555`
    pub fn default_connect() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }

    /// Host part as written
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the host is the bind-all wildcard
    pub fn is_wildcard(&self) -> bool {
        self.host == WILDCARD_HOST
    }

    /// Address string suitable for binding a listener
    pub fn bind_address(&self) -> String {
        if self.is_wildcard() {
            format!("0.0.0.0:{}", self.port)
        } else {
            self.socket_address()
        }
    }

    /// Address string suitable for connecting
    pub fn connect_address(&self) -> Result<String> {
        if self.is_wildcard() {
            return Err(StreamError::invalid_endpoint(
                self.to_string(),
                "cannot connect to the wildcard host",
            ));
        }
        Ok(self.socket_address())
    }

    fn socket_address(&self) -> String {
        // Bare IPv6 literals need brackets to carry a port.
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}", self.socket_address())
    }
}

impl FromStr for Endpoint {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("tcp://")
            .ok_or_else(|| StreamError::invalid_endpoint(s, "only the tcp:// scheme is supported"))?;

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| StreamError::invalid_endpoint(s, "unterminated IPv6 literal"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| StreamError::invalid_endpoint(s, "missing port"))?;
            (host, port)
        } else {
            rest.rsplit_once(':')
                .ok_or_else(|| StreamError::invalid_endpoint(s, "missing port"))?
        };

        if host.is_empty() {
            return Err(StreamError::invalid_endpoint(s, "missing host"));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| StreamError::invalid_endpoint(s, format!("invalid port: {}", e)))?;

        Ok(Self::new(host, port))
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
