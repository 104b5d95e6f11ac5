//! Consumer notifications.
//!
//! Each session owns one [`SessionObserver`]. Every method has a default so
//! consumers implement only what they need.

use crate::session::{SessionId, SessionState};

/// Consumer verdict on an incoming message or first chunk
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Accept the message
    #[default]
    Accepted,
    /// Refuse the media type (answered with 415)
    Rejected(String),
    /// Consumer could not handle the message (answered with 500)
    Failed(String),
}

/// Metadata of a chunked message's first chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstChunk {
    /// Message id
    pub message_id: String,
    /// `Content-Type`
    pub content_type: Option<String>,
    /// `Content-Disposition`
    pub disposition: Option<String>,
    /// Total size, if the sender announced it
    pub total_bytes: Option<u64>,
    /// Session was negotiated as a file transfer
    pub is_file: bool,
}

/// A completely received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Message id
    pub message_id: String,
    /// `Content-Type`
    pub content_type: Option<String>,
    /// `Content-Disposition`
    pub disposition: Option<String>,
    /// Payload
    pub body: Vec<u8>,
}

/// Byte progress of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes sent or received so far
    pub bytes: u64,
    /// Total size, if known
    pub total: Option<u64>,
}

/// Session notifications
#[allow(unused_variables)]
pub trait SessionObserver {
    /// Session changed state
    fn on_state_changed(&mut self, session: &SessionId, state: SessionState) {}

    /// Relay accepted the AUTH request
    fn on_authenticated(&mut self, session: &SessionId) {}

    /// First chunk of a chunked message arrived
    fn on_first_chunk(&mut self, session: &SessionId, chunk: &FirstChunk) -> Outcome {
        Outcome::Accepted
    }

    /// A chunk of `message_id` was stored
    fn on_chunk_received(&mut self, session: &SessionId, message_id: &str, progress: Progress) {}

    /// A complete message arrived
    fn on_message_received(&mut self, session: &SessionId, message: IncomingMessage) -> Outcome {
        Outcome::Accepted
    }

    /// A chunk of `message_id` was handed to the transport
    fn on_message_sent(&mut self, session: &SessionId, message_id: &str, progress: Progress) {}

    /// The peer confirmed delivery of `message_id`
    fn on_message_delivered(&mut self, session: &SessionId, message_id: &str) {}

    /// `message_id` could not be delivered
    fn on_message_send_failed(&mut self, session: &SessionId, message_id: &str, status: u16, reason: &str) {}

    /// The peer aborted an incoming message
    fn on_receive_aborted(&mut self, session: &SessionId, message_id: &str) {}

    /// An incoming message stalled past the chunk timeout
    fn on_receive_timeout(&mut self, session: &SessionId, message_id: &str) {}
}

/// Observer that ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl SessionObserver for NullObserver {}
