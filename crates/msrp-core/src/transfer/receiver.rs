//! Incoming message reassembly.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::message::{ByteRange, Flag};

/// Out-of-order bytes held when no limit is configured
pub const DEFAULT_PENDING_LIMIT: usize = 4 * 1024 * 1024;

/// Reassembles one incoming message from its chunks.
///
/// In-order data accumulates in a buffer that is flushed to the sink once it
/// exceeds the configured threshold or the message completes. Chunks that
/// arrive early wait in a map keyed by start offset. A chunk that overlaps
/// data already received replaces it ("last received wins").
#[derive(Debug)]
pub struct ChunkReceiver {
    message_id: String,
    content_type: Option<String>,
    disposition: Option<String>,
    total_bytes: Option<u64>,

    sink: Vec<u8>,
    buffer: Vec<u8>,
    flush_threshold: usize,
    incontiguous: BTreeMap<u64, Vec<u8>>,
    pending_bytes: usize,
    pending_limit: usize,
    high_water: u64,
    received_bytes: u64,

    aborted: bool,
    remote_abort: bool,
    last_receive: Instant,
}

impl ChunkReceiver {
    /// Receiver created from a message's first chunk metadata
    #[must_use]
    pub fn new(
        message_id: impl Into<String>,
        content_type: Option<String>,
        total_bytes: Option<u64>,
        flush_threshold: usize,
        now: Instant,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            content_type,
            disposition: None,
            total_bytes,
            sink: Vec::new(),
            buffer: Vec::new(),
            flush_threshold,
            incontiguous: BTreeMap::new(),
            pending_bytes: 0,
            pending_limit: DEFAULT_PENDING_LIMIT,
            high_water: 0,
            received_bytes: 0,
            aborted: false,
            remote_abort: false,
            last_receive: now,
        }
    }

    /// Record the first chunk's `Content-Disposition`
    #[must_use]
    pub fn with_disposition(mut self, disposition: Option<String>) -> Self {
        self.disposition = disposition;
        self
    }

    /// Cap on bytes held for chunks that arrived ahead of a gap
    #[must_use]
    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }

    /// Feed one chunk. Returns `false` if the chunk is rejected.
    ///
    /// A chunk that does not fit the message size, or that would overfill
    /// the out-of-order buffer, is rejected and aborts the receiver.
    pub fn process_chunk(
        &mut self,
        message_id: &str,
        range: ByteRange,
        flag: Flag,
        body: &[u8],
        now: Instant,
    ) -> bool {
        if self.aborted || message_id != self.message_id {
            return false;
        }
        self.last_receive = now;

        if flag == Flag::Abort {
            tracing::debug!(message_id = %self.message_id, "peer aborted message");
            self.aborted = true;
            self.remote_abort = true;
            return false;
        }

        let Some(last) = range.last_byte(body.len() as u64) else {
            return self.reject(range, body.len(), "byte range out of bounds");
        };
        let total = match flag {
            Flag::End => Some(last),
            _ => self.total_bytes.or(range.total),
        };
        if let Some(total) = total {
            if last > total || self.high_water > total {
                return self.reject(range, body.len(), "byte range beyond message size");
            }
            if self.total_bytes.is_some_and(|known| known != total) && flag == Flag::End {
                return self.reject(range, body.len(), "end chunk contradicts message size");
            }
        }
        if range.start > self.expected_offset() && self.pending_bytes.saturating_add(body.len()) > self.pending_limit {
            return self.reject(range, body.len(), "out-of-order buffer full");
        }
        self.total_bytes = total;

        self.received_bytes += body.len() as u64;
        if !body.is_empty() {
            self.high_water = self.high_water.max(last);
            self.place(range.start, body.to_vec());
        }
        if self.buffer.len() > self.flush_threshold || self.assembled_complete() {
            self.flush();
        }
        true
    }

    fn reject(&mut self, range: ByteRange, len: usize, reason: &'static str) -> bool {
        tracing::warn!(message_id = %self.message_id, %range, len, reason, "chunk rejected");
        self.aborted = true;
        false
    }

    fn expected_offset(&self) -> u64 {
        (self.sink.len() + self.buffer.len()) as u64 + 1
    }

    fn place(&mut self, start: u64, data: Vec<u8>) {
        let expected = self.expected_offset();
        if start > expected {
            self.pending_bytes += data.len();
            if let Some(replaced) = self.incontiguous.insert(start, data) {
                self.pending_bytes -= replaced.len();
            }
            return;
        }
        self.write_at(start, data);

        while let Some((&next, _)) = self.incontiguous.first_key_value() {
            if next > self.expected_offset() {
                break;
            }
            if let Some(data) = self.incontiguous.remove(&next) {
                self.pending_bytes -= data.len();
                self.write_at(next, data);
            }
        }
    }

    fn write_at(&mut self, start: u64, data: Vec<u8>) {
        if start == self.expected_offset() {
            self.buffer.extend_from_slice(&data);
            return;
        }
        self.flush();
        let offset = usize::try_from(start.saturating_sub(1)).unwrap_or(usize::MAX).min(self.sink.len());
        let overlap_end = offset.saturating_add(data.len());
        let mut rebuilt = Vec::with_capacity(self.sink.len().max(overlap_end));
        if offset > 0 {
            rebuilt.extend_from_slice(&self.sink[..offset]);
        }
        rebuilt.extend_from_slice(&data);
        if overlap_end < self.sink.len() {
            rebuilt.extend_from_slice(&self.sink[overlap_end..]);
        }
        tracing::debug!(message_id = %self.message_id, start, len = data.len(), "overwrote duplicate range");
        self.sink = rebuilt;
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.sink.append(&mut self.buffer);
        }
    }

    fn assembled_complete(&self) -> bool {
        self.total_bytes
            .is_some_and(|total| (self.sink.len() + self.buffer.len()) as u64 == total)
    }

    /// Aborted, or every byte is in the sink
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.aborted || self.total_bytes.is_some_and(|total| self.sink.len() as u64 == total)
    }

    /// Abort locally; further chunks are rejected
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Whether no chunk arrived within `timeout`
    #[must_use]
    pub fn timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_receive) >= timeout
    }

    /// Take the assembled payload
    #[must_use]
    pub fn into_payload(mut self) -> Vec<u8> {
        self.flush();
        self.sink
    }

    /// Message id
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Content type of the first chunk
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Content disposition of the first chunk
    #[must_use]
    pub fn disposition(&self) -> Option<&str> {
        self.disposition.as_deref()
    }

    /// Total size, once known
    #[must_use]
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    /// Bytes flushed to the sink
    #[must_use]
    pub fn size(&self) -> u64 {
        self.sink.len() as u64
    }

    /// Contiguous bytes received so far, buffered or flushed
    #[must_use]
    pub fn contiguous_bytes(&self) -> u64 {
        (self.sink.len() + self.buffer.len()) as u64
    }

    /// Payload bytes received, counting retransmissions
    #[must_use]
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Locally or remotely aborted
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Peer aborted the message
    #[must_use]
    pub fn is_remote_abort(&self) -> bool {
        self.remote_abort
    }
}
