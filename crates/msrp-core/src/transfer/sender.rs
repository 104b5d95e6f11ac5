//! Outgoing message state.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use super::Chunk;
use super::source::PayloadSource;
use crate::message::{ByteRange, Flag, Header, ReportStatus};

/// Out-of-order REPORT ranges buffered before falling back to `resume()`
pub const MAX_INCONTIGUOUS_REPORTS: usize = 16;

/// Effect of a REPORT on its sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Report did not name this message, or the sender already aborted
    Ignored,
    /// Acknowledged range recorded
    Progress,
    /// Too many gaps; `sent_bytes` rewound to `acked_bytes`
    Resumed,
    /// Peer reported failure; sender aborted
    Failed(u16),
}

/// Splits one outgoing message into chunks and tracks acknowledgements.
///
/// `acked_bytes <= sent_bytes <= size` holds at all times.
pub struct ChunkSender {
    message_id: String,
    source: Box<dyn PayloadSource>,
    content_type: Option<String>,
    extra_headers: Vec<Header>,
    size: u64,
    chunk_size: u64,

    sent_bytes: u64,
    acked_bytes: u64,
    incontiguous: BTreeMap<u64, u64>,
    started: bool,

    aborted: bool,
    remote_abort: bool,
    abort_sent: bool,

    report_requested: bool,
    report_timeout: Duration,
    report_deadline: Option<Instant>,
}

impl ChunkSender {
    /// Sender for a message read from `source`
    #[must_use]
    pub fn new(
        message_id: impl Into<String>,
        source: Box<dyn PayloadSource>,
        content_type: impl Into<String>,
        chunk_size: usize,
        report_timeout: Duration,
    ) -> Self {
        let size = source.len();
        Self {
            message_id: message_id.into(),
            source,
            content_type: Some(content_type.into()),
            extra_headers: Vec::new(),
            size,
            chunk_size: chunk_size.max(1) as u64,
            sent_bytes: 0,
            acked_bytes: 0,
            incontiguous: BTreeMap::new(),
            started: false,
            aborted: false,
            remote_abort: false,
            abort_sent: false,
            report_requested: true,
            report_timeout,
            report_deadline: None,
        }
    }

    /// Empty SEND used to bind the connection after negotiation.
    ///
    /// Carries no body, no content type and asks for no report.
    #[must_use]
    pub fn ping(message_id: impl Into<String>) -> Self {
        let mut sender = Self::new(message_id, Box::new(Vec::new()), "", 1, Duration::ZERO);
        sender.content_type = None;
        sender.report_requested = false;
        sender
    }

    /// Attach a MIME header sent with the first chunk only
    #[must_use]
    pub fn with_header(mut self, header: Header) -> Self {
        self.extra_headers.push(header);
        self
    }

    /// Produce the next chunk.
    ///
    /// After `abort()` this yields one abort-flagged chunk without payload.
    ///
    /// # Errors
    /// Returns the payload source's I/O error.
    pub fn next_chunk(&mut self, now: Instant) -> io::Result<Chunk> {
        if self.aborted {
            self.abort_sent = true;
            return Ok(Chunk {
                message_id: self.message_id.clone(),
                range: ByteRange::new(self.sent_bytes + 1, self.sent_bytes, self.size),
                flag: Flag::Abort,
                content_type: None,
                headers: Vec::new(),
                body: None,
                report: self.report_requested,
            });
        }

        let start = self.sent_bytes + 1;
        let end = (self.sent_bytes + self.chunk_size).min(self.size);
        let headers = if start == 1 { self.extra_headers.clone() } else { Vec::new() };

        let body = if self.size == 0 {
            None
        } else {
            let len = usize::try_from(end - self.sent_bytes)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk too large"))?;
            let mut buf = vec![0u8; len];
            let read = self.source.read_at(self.sent_bytes, &mut buf)?;
            if read != len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("payload source returned {read} of {len} bytes"),
                ));
            }
            Some(buf)
        };

        self.sent_bytes = end;
        self.started = true;
        let flag = if end < self.size { Flag::Continued } else { Flag::End };

        if self.is_send_complete() && self.report_requested && self.report_deadline.is_none() {
            self.report_deadline = Some(now + self.report_timeout);
        }

        Ok(Chunk {
            message_id: self.message_id.clone(),
            range: ByteRange::new(start, end, self.size),
            flag,
            content_type: body.as_ref().and(self.content_type.clone()),
            headers,
            body,
            report: self.report_requested,
        })
    }

    /// Apply a REPORT for `message_id` covering `range`.
    pub fn process_report(&mut self, message_id: &str, range: ByteRange, status: &ReportStatus) -> ReportOutcome {
        if message_id != self.message_id || self.aborted {
            return ReportOutcome::Ignored;
        }
        if !status.is_success() {
            self.aborted = true;
            self.remote_abort = true;
            self.report_deadline = None;
            return ReportOutcome::Failed(status.code);
        }
        if range.total.is_some_and(|total| total != self.size) {
            tracing::warn!(
                message_id = %self.message_id,
                range = %range,
                size = self.size,
                "REPORT byte range does not match message size"
            );
        }

        let end = range.end.unwrap_or(self.size).min(self.sent_bytes);
        let mut outcome = ReportOutcome::Progress;
        if range.start <= self.acked_bytes + 1 {
            self.acked_bytes = self.acked_bytes.max(end);
            self.drain_incontiguous();
        } else if self.incontiguous.len() >= MAX_INCONTIGUOUS_REPORTS {
            tracing::debug!(message_id = %self.message_id, "too many out-of-order reports, resuming");
            self.resume();
            outcome = ReportOutcome::Resumed;
        } else {
            let slot = self.incontiguous.entry(range.start).or_insert(end);
            *slot = (*slot).max(end);
        }

        if self.acked_bytes >= self.size {
            self.report_deadline = None;
        }
        outcome
    }

    fn drain_incontiguous(&mut self) {
        while let Some((&start, &end)) = self.incontiguous.first_key_value() {
            if start > self.acked_bytes + 1 {
                break;
            }
            self.incontiguous.remove(&start);
            self.acked_bytes = self.acked_bytes.max(end);
        }
    }

    /// Rewind to the acknowledged prefix so the tail is sent again
    pub fn resume(&mut self) {
        self.sent_bytes = self.acked_bytes;
        self.incontiguous.clear();
        self.report_deadline = None;
        if self.size > 0 && self.acked_bytes == 0 {
            self.started = false;
        }
    }

    /// Abort locally; a pending report wait expires immediately
    pub fn abort(&mut self, now: Instant) {
        self.aborted = true;
        if self.report_deadline.is_some() {
            self.report_deadline = Some(now);
        }
    }

    /// All bytes handed out (or aborted)
    #[must_use]
    pub fn is_send_complete(&self) -> bool {
        if self.aborted {
            return self.abort_sent || self.remote_abort || (self.started && self.sent_bytes >= self.size);
        }
        self.started && self.sent_bytes >= self.size
    }

    /// All bytes acknowledged (or aborted)
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.aborted || (self.started && self.acked_bytes >= self.size)
    }

    /// Aborted on both ends; nothing more to send
    #[must_use]
    pub fn is_mutually_aborted(&self) -> bool {
        self.aborted && self.remote_abort
    }

    /// Whether the report wait has expired
    #[must_use]
    pub fn report_timed_out(&self, now: Instant) -> bool {
        self.report_deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Message id
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Total size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// High-water mark of bytes handed out
    #[must_use]
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    /// Contiguous acknowledged prefix
    #[must_use]
    pub fn acked_bytes(&self) -> u64 {
        self.acked_bytes
    }

    /// Locally or remotely aborted
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Peer reported failure
    #[must_use]
    pub fn is_remote_abort(&self) -> bool {
        self.remote_abort
    }

    /// Whether the peer is asked for a success REPORT
    #[must_use]
    pub fn report_requested(&self) -> bool {
        self.report_requested
    }

    /// Pending report deadline
    #[must_use]
    pub fn report_deadline(&self) -> Option<Instant> {
        self.report_deadline
    }

    /// Number of buffered out-of-order report ranges
    #[must_use]
    pub fn incontiguous_reports(&self) -> usize {
        self.incontiguous.len()
    }
}

impl fmt::Debug for ChunkSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSender")
            .field("message_id", &self.message_id)
            .field("size", &self.size)
            .field("sent_bytes", &self.sent_bytes)
            .field("acked_bytes", &self.acked_bytes)
            .field("aborted", &self.aborted)
            .field("remote_abort", &self.remote_abort)
            .finish_non_exhaustive()
    }
}
