//! Error types for frame streaming.
//!
//! Every fallible operation in simcast returns [`StreamError`]. The variants
//! follow the three failure classes of the streaming pipeline:
//!
//! - **Startup errors**: simulator connection, endpoint parsing, bind/connect,
//!   missing attachment target, invalid configuration. These abort a run
//!   before the main loop is entered.
//! - **Per-message errors**: a received message that cannot be decoded into a
//!   frame. A receive loop logs these and moves on to the next message.
//! - **Runtime errors**: simulator or renderer failures inside the loop. They
//!   end the loop and trigger the session teardown.
//!
//! ```rust
//! use simcast::StreamError;
//!
//! let error = StreamError::decode("payload is 12 bytes, expected 16");
//! assert!(error.is_per_message());
//! assert!(!error.is_retryable());
//!
//! for suggestion in StreamError::no_attachment_target("traffic.traffic_light*").recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for streaming operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Failed to connect to simulator at {address}: {reason}")]
    SimulatorConnection { address: String, reason: String },

    #[error("Simulator operation '{operation}' failed: {details}")]
    Simulator { operation: String, details: String },

    #[error("No actor matching '{pattern}' to attach the camera to")]
    NoAttachmentTarget { pattern: String },

    #[error("Failed to bind publisher to {endpoint}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect subscriber to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Frame decode failed: {details}")]
    Decode { details: String },

    #[error("Wire protocol violation: {details}")]
    Protocol { details: String },

    #[error("Configuration error in {}: {}", display_path(.path), .details)]
    Config { path: Option<PathBuf>, details: String },

    #[error("I/O error during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Renderer failed: {details}")]
    Render { details: String },
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref().map_or_else(|| "<defaults>".to_string(), |p| p.display().to_string())
}

impl StreamError {
    /// Returns whether this error only affects a single received message.
    ///
    /// Receive loops drop the offending message and continue with the next one.
    pub fn is_per_message(&self) -> bool {
        matches!(self, StreamError::Decode { .. })
    }

    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::SimulatorConnection { .. } => true,
            StreamError::Connect { .. } => true,
            StreamError::Timeout { .. } => true,
            StreamError::Protocol { .. } => true,
            StreamError::Bind { .. } => false,
            StreamError::Simulator { .. } => false,
            StreamError::NoAttachmentTarget { .. } => false,
            StreamError::InvalidEndpoint { .. } => false,
            StreamError::Decode { .. } => false,
            StreamError::Config { .. } => false,
            StreamError::Io { .. } => false,
            StreamError::Render { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::SimulatorConnection { .. } => vec![
                "Ensure the simulator server is running",
                "Check the simulator host and port",
                "Increase the simulator connection timeout",
            ],
            StreamError::Simulator { .. } => vec![
                "Check the simulator server logs",
                "Verify the requested blueprint or actor exists",
            ],
            StreamError::NoAttachmentTarget { .. } => vec![
                "Load a map that contains traffic lights",
                "Check the attachment pattern in the scenario configuration",
            ],
            StreamError::Bind { .. } => vec![
                "Check that no other publisher is bound to the same port",
                "Use a different port in the publish endpoint",
                "Verify permissions for the requested address",
            ],
            StreamError::Connect { .. } => vec![
                "Check the subscriber endpoint host name",
                "Verify the publisher is reachable from this machine",
            ],
            StreamError::InvalidEndpoint { .. } => vec![
                "Use the form tcp://<host>:<port>",
                "Use '*' as host to bind on all interfaces",
            ],
            StreamError::Decode { .. } => vec![
                "Check that publisher and subscriber speak the same wire format",
                "Verify the publisher sends width*height*4 payload bytes",
            ],
            StreamError::Protocol { .. } => vec![
                "Check that the endpoint belongs to a simcast publisher",
                "Raise the maximum message size if frames are very large",
            ],
            StreamError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare against the documented defaults",
            ],
            StreamError::Io { .. } => vec![
                "Check file and directory permissions",
                "Ensure sufficient disk space",
            ],
            StreamError::Timeout { .. } => vec![
                "Increase timeout duration",
                "Check system performance",
            ],
            StreamError::Render { .. } => vec![
                "Check the snapshot directory is writable",
                "Run with a log renderer to isolate the problem",
            ],
        }
    }

    /// Helper constructor for simulator connection failures.
    pub fn simulator_connection(address: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::SimulatorConnection { address: address.into(), reason: reason.into() }
    }

    /// Helper constructor for simulator operation failures.
    pub fn simulator(operation: impl Into<String>, details: impl Into<String>) -> Self {
        StreamError::Simulator { operation: operation.into(), details: details.into() }
    }

    /// Helper constructor for a missing camera attachment target.
    pub fn no_attachment_target(pattern: impl Into<String>) -> Self {
        StreamError::NoAttachmentTarget { pattern: pattern.into() }
    }

    /// Helper constructor for endpoint parse failures.
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::InvalidEndpoint { endpoint: endpoint.into(), reason: reason.into() }
    }

    /// Helper constructor for per-message decode failures.
    pub fn decode(details: impl Into<String>) -> Self {
        StreamError::Decode { details: details.into() }
    }

    /// Helper constructor for wire protocol violations.
    pub fn protocol(details: impl Into<String>) -> Self {
        StreamError::Protocol { details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(path: Option<PathBuf>, details: impl Into<String>) -> Self {
        StreamError::Config { path, details: details.into() }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StreamError::Io { context: context.into(), source }
    }

    /// Helper constructor for renderer failures.
    pub fn render(details: impl Into<String>) -> Self {
        StreamError::Render { details: details.into() }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io { context: "<unknown>".to_string(), source: err }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Decode { details: format!("metadata is not valid JSON: {}", err) }
    }
}
