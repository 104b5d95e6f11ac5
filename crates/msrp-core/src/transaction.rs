//! Outgoing request correlation.
//!
//! Every request except REPORT is registered here by transaction id until its
//! response arrives or its deadline passes. An expired entry is turned into a
//! locally synthesized 408 response by the connection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::session::SessionId;

/// What a pending request was for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionKind {
    /// Relay authentication
    Auth,
    /// One SEND chunk
    Send {
        /// Message the chunk belongs to
        message_id: String,
        /// Chunk carried the `$` or `#` flag
        last_chunk: bool,
    },
}

/// A request awaiting its response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Owning session
    pub session: SessionId,
    /// Request kind
    pub kind: TransactionKind,
    /// Timeout instant
    pub deadline: Instant,
}

/// Pending requests keyed by transaction id
#[derive(Debug)]
pub struct TransactionTable {
    pending: HashMap<String, Transaction>,
    timeout: Duration,
}

impl TransactionTable {
    /// Empty table using `timeout` for every request
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Whether `tid` is outstanding
    #[must_use]
    pub fn contains(&self, tid: &str) -> bool {
        self.pending.contains_key(tid)
    }

    /// Register a request. Returns `false` if `tid` is already outstanding.
    pub fn register(&mut self, tid: &str, session: SessionId, kind: TransactionKind, now: Instant) -> bool {
        if self.pending.contains_key(tid) {
            return false;
        }
        tracing::debug!(tid, session = %session, kind = ?kind, "transaction registered");
        self.pending.insert(
            tid.to_string(),
            Transaction {
                session,
                kind,
                deadline: now + self.timeout,
            },
        );
        true
    }

    /// Remove the entry matching a received response
    pub fn complete(&mut self, tid: &str) -> Option<Transaction> {
        self.pending.remove(tid)
    }

    /// Remove and return every entry whose deadline has passed
    pub fn expire(&mut self, now: Instant) -> Vec<(String, Transaction)> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(tid, _)| tid.clone())
            .collect();
        let mut out: Vec<(String, Transaction)> = expired
            .into_iter()
            .filter_map(|tid| self.pending.remove(&tid).map(|t| (tid, t)))
            .collect();
        out.sort_by_key(|(_, t)| t.deadline);
        out
    }

    /// Drop every entry owned by `session`
    pub fn drop_session(&mut self, session: &SessionId) {
        self.pending.retain(|_, t| &t.session != session);
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Earliest deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|t| t.deadline).min()
    }

    /// Number of outstanding requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is outstanding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
