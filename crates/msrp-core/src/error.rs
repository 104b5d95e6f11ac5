//! Error types for the MSRP core protocol.

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Core protocol errors
#[derive(Debug, Error)]
pub enum Error {
    /// Wire or SDP parsing error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Session error
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Authentication error
    #[error("auth error: {0}")]
    Crypto(#[from] msrp_crypto::CryptoError),
}

/// Framing and decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input ended before a complete message was seen
    #[error("unexpected end of input")]
    Incomplete,

    /// First line is not `MSRP <tid> <method>` / `MSRP <tid> <status> [comment]`
    #[error("invalid first line: {0}")]
    FirstLine(String),

    /// Header line without a colon, or a header value that failed its sub-parser
    #[error("invalid header {name}: {value}")]
    Header {
        /// Header name as received
        name: String,
        /// Offending value
        value: String,
    },

    /// Byte-Range value did not parse
    #[error("invalid byte range: {0}")]
    ByteRange(String),

    /// End-line missing or carrying an unknown continuation flag
    #[error("invalid end-line for transaction {0}")]
    EndLine(String),

    /// Frame exceeded the framer's size bound
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Bytes buffered so far
        size: usize,
        /// Configured bound
        max: usize,
    },

    /// MSRP URI did not parse
    #[error("invalid MSRP URI: {0}")]
    Uri(String),

    /// SDP line did not parse
    #[error("invalid SDP line {line}: {reason}")]
    Sdp {
        /// 1-based line number
        line: usize,
        /// What went wrong
        reason: String,
    },
}

/// Session-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Invalid state for the requested operation
    #[error("invalid state for operation: {0}")]
    InvalidState(&'static str),

    /// Unknown session ID
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Unknown message ID
    #[error("unknown message: {0}")]
    UnknownMessage(String),

    /// SDP offer/answer did not contain a usable message media line
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Relay authentication failed
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Connection is not open
    #[error("connection is not open")]
    NotConnected,
}

/// Result alias for core operations
pub type Result<T> = std::result::Result<T, Error>;
