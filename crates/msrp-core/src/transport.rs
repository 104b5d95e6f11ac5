//! Transport seam.
//!
//! The core never performs I/O itself. A [`Connection`](crate::Connection)
//! hands every encoded frame to a [`Transport`]; the owner of the socket feeds
//! received frames back through `Connection::on_message` and reports
//! open/close/error events.

use std::collections::VecDeque;
use std::io;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport is closed
    #[error("Transport is closed")]
    Closed,

    /// Transport-specific error
    #[error("Transport error: {0}")]
    Other(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// An ordered, reliable, full-duplex frame pipe.
///
/// `send` must not block: implementations queue the frame and write it from
/// their own event loop.
pub trait Transport {
    /// Queue one encoded frame for delivery.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` once the transport is closed.
    fn send(&mut self, frame: Vec<u8>) -> TransportResult<()>;

    /// Close the transport.
    ///
    /// # Errors
    /// Returns `TransportError` if closing fails
    fn close(&mut self) -> TransportResult<()>;

    /// Check if the transport is closed.
    fn is_closed(&self) -> bool;

    /// Get transport statistics.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total frames sent
    pub frames_sent: u64,
    /// Send errors
    pub send_errors: u64,
}

impl TransportStats {
    /// Record a successful send
    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.frames_sent += 1;
    }

    /// Record a send error
    pub fn record_send_error(&mut self) {
        self.send_errors += 1;
    }
}

/// In-memory transport collecting outgoing frames in a queue.
///
/// Used by tests and benches to wire two connections together without
/// sockets.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    outbox: VecDeque<Vec<u8>>,
    closed: bool,
    stats: TransportStats,
}

impl MemoryTransport {
    /// Create an open, empty transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every queued frame
    pub fn take_frames(&mut self) -> Vec<Vec<u8>> {
        self.outbox.drain(..).collect()
    }

    /// Number of queued frames
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    /// Reopen after `close`
    pub fn reopen(&mut self) {
        self.closed = false;
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: Vec<u8>) -> TransportResult<()> {
        if self.closed {
            self.stats.record_send_error();
            return Err(TransportError::Closed);
        }
        self.stats.record_send(frame.len());
        self.outbox.push_back(frame);
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
