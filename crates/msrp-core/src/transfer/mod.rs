//! Chunked transfer layer.
//!
//! [`ChunkSender`] splits an outgoing message into SEND chunks and tracks
//! which byte ranges the peer has acknowledged through REPORTs.
//! [`ChunkReceiver`] reassembles incoming chunks, tolerating reordering and
//! retransmission.

pub mod receiver;
pub mod sender;
pub mod source;

pub use receiver::ChunkReceiver;
pub use sender::{ChunkSender, ReportOutcome};
pub use source::{FileSource, PayloadSource};

use crate::message::{ByteRange, Flag, Header};

/// One SEND chunk produced by a [`ChunkSender`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Message the chunk belongs to
    pub message_id: String,
    /// Carried byte range
    pub range: ByteRange,
    /// Continuation flag
    pub flag: Flag,
    /// `Content-Type`, absent on empty and abort chunks
    pub content_type: Option<String>,
    /// Extra MIME headers (first chunk only)
    pub headers: Vec<Header>,
    /// Payload
    pub body: Option<Vec<u8>>,
    /// Ask for Success/Failure reports
    pub report: bool,
}

impl Chunk {
    /// Payload length
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }

    /// Whether the chunk carries no payload
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
