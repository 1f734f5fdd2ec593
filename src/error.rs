//! Error types for the load generator.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

/// Errors that can occur while configuring or running a load test.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCPv6 message received.
    ///
    /// Covers frames shorter than the 4-byte message header and relay
    /// frames shorter than the fixed relay envelope.
    #[error("Invalid DHCPv6 packet: {0}")]
    InvalidPacket(String),

    /// An option stream contained a zero option code, a truncated header,
    /// or a length that runs past the end of the buffer.
    #[error("Malformed option at offset {offset}: {reason}")]
    MalformedOption { offset: usize, reason: &'static str },

    /// The encoder was asked to build a message type a client never sends.
    #[error("Unsupported message type for encoding: {0}")]
    UnsupportedMessage(u8),

    /// Invalid run configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 546 without sufficient privileges.
    #[error("Socket error: {0}")]
    Socket(String),

    /// A lease record line could not be parsed.
    #[error("Invalid lease record: {0}")]
    InvalidLease(String),
}

/// A specialized Result type for load generator operations.
pub type Result<T> = std::result::Result<T, Error>;
