//! Fair multiplexing of active senders over one connection.
//!
//! Senders with data left form a round-robin queue. A pass hands out at most
//! [`MAX_CHUNKS_PER_PASS`] chunks and never lets the number of unanswered
//! SENDs exceed the configured window.

use std::collections::VecDeque;

use crate::session::SessionId;

/// Chunks admitted per scheduling pass
pub const MAX_CHUNKS_PER_PASS: usize = 2;

/// Identifies one sender on the connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderKey {
    /// Owning session
    pub session: SessionId,
    /// Message id
    pub message_id: String,
}

impl SenderKey {
    /// Build a key
    pub fn new(session: SessionId, message_id: impl Into<String>) -> Self {
        Self {
            session,
            message_id: message_id.into(),
        }
    }
}

/// Result of asking a sender for its next chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Sender has nothing left to send (finished, removed or mutually aborted)
    Gone,
    /// One chunk was sent
    Sent {
        /// Sender handed out its last chunk
        send_complete: bool,
    },
}

/// Round-robin queue of active senders with an outstanding-send window
#[derive(Debug)]
pub struct Scheduler {
    active: VecDeque<SenderKey>,
    outstanding: usize,
    max_outstanding: usize,
}

impl Scheduler {
    /// Scheduler allowing `max_outstanding` unanswered SENDs
    #[must_use]
    pub fn new(max_outstanding: usize) -> Self {
        Self {
            active: VecDeque::new(),
            outstanding: 0,
            max_outstanding,
        }
    }

    /// Queue a sender at the back, unless already queued
    pub fn activate(&mut self, key: SenderKey) {
        if !self.active.contains(&key) {
            self.active.push_back(key);
        }
    }

    /// Remove one sender
    pub fn remove(&mut self, key: &SenderKey) {
        self.active.retain(|k| k != key);
    }

    /// Remove every sender of `session`
    pub fn remove_session(&mut self, session: &SessionId) {
        self.active.retain(|k| &k.session != session);
    }

    /// A SEND was answered (or timed out)
    pub fn on_response(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    /// Forget queue and window after the transport closed
    pub fn reset(&mut self) {
        self.active.clear();
        self.outstanding = 0;
    }

    /// Whether a pass would send anything
    #[must_use]
    pub fn wants_run(&self) -> bool {
        !self.active.is_empty() && self.outstanding < self.max_outstanding
    }

    /// Unanswered SENDs
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Queued senders
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Whether `key` is queued
    #[must_use]
    pub fn is_active(&self, key: &SenderKey) -> bool {
        self.active.contains(key)
    }

    /// Run one pass. `step` produces and sends one chunk for the given sender.
    ///
    /// Returns the number of chunks sent.
    pub fn run(&mut self, mut step: impl FnMut(&SenderKey) -> Step) -> usize {
        let mut sent = 0;
        while sent < MAX_CHUNKS_PER_PASS && self.outstanding < self.max_outstanding {
            let Some(key) = self.active.front().cloned() else {
                break;
            };
            match step(&key) {
                Step::Gone => {
                    self.active.pop_front();
                }
                Step::Sent { send_complete } => {
                    sent += 1;
                    self.outstanding += 1;
                    self.active.pop_front();
                    if !send_complete {
                        self.active.push_back(key);
                    }
                }
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn key(message_id: &str) -> SenderKey {
        SenderKey::new(SessionId::from("s"), message_id)
    }

    /// Drives a pass against per-sender remaining chunk counts.
    fn pass(scheduler: &mut Scheduler, remaining: &mut HashMap<String, usize>, log: &mut Vec<String>) -> usize {
        scheduler.run(|k| match remaining.get_mut(&k.message_id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                log.push(k.message_id.clone());
                Step::Sent { send_complete: *left == 0 }
            }
            _ => Step::Gone,
        })
    }

    #[test]
    fn test_pass_admits_two_chunks() {
        let mut scheduler = Scheduler::new(32);
        scheduler.activate(key("a"));
        let mut remaining = HashMap::from([("a".to_string(), 5)]);
        let mut log = Vec::new();
        assert_eq!(pass(&mut scheduler, &mut remaining, &mut log), 2);
        assert_eq!(scheduler.outstanding(), 2);
        assert!(scheduler.wants_run());
    }

    #[test]
    fn test_round_robin_interleaves() {
        let mut scheduler = Scheduler::new(32);
        scheduler.activate(key("a"));
        scheduler.activate(key("b"));
        let mut remaining = HashMap::from([("a".to_string(), 3), ("b".to_string(), 3)]);
        let mut log = Vec::new();
        while scheduler.wants_run() {
            pass(&mut scheduler, &mut remaining, &mut log);
        }
        assert_eq!(log, vec!["a", "b", "a", "b", "a", "b"]);
        assert_eq!(scheduler.active_len(), 0);
    }

    #[test]
    fn test_window_bound() {
        let mut scheduler = Scheduler::new(3);
        scheduler.activate(key("a"));
        let mut remaining = HashMap::from([("a".to_string(), 10)]);
        let mut log = Vec::new();
        pass(&mut scheduler, &mut remaining, &mut log);
        pass(&mut scheduler, &mut remaining, &mut log);
        assert_eq!(scheduler.outstanding(), 3);
        assert!(!scheduler.wants_run());
        assert_eq!(pass(&mut scheduler, &mut remaining, &mut log), 0);

        scheduler.on_response();
        assert!(scheduler.wants_run());
        assert_eq!(pass(&mut scheduler, &mut remaining, &mut log), 1);
        assert_eq!(scheduler.outstanding(), 3);
    }

    #[test]
    fn test_gone_sender_removed_without_counting() {
        let mut scheduler = Scheduler::new(32);
        scheduler.activate(key("gone"));
        scheduler.activate(key("a"));
        scheduler.activate(key("a"));
        let mut remaining = HashMap::from([("a".to_string(), 1)]);
        let mut log = Vec::new();
        assert_eq!(pass(&mut scheduler, &mut remaining, &mut log), 1);
        assert_eq!(log, vec!["a"]);
        assert_eq!(scheduler.active_len(), 0);
    }

    #[test]
    fn test_reset_and_remove_session() {
        let mut scheduler = Scheduler::new(4);
        scheduler.activate(key("a"));
        scheduler.activate(SenderKey::new(SessionId::from("other"), "b"));
        scheduler.remove_session(&SessionId::from("s"));
        assert_eq!(scheduler.active_len(), 1);
        scheduler.remove(&SenderKey::new(SessionId::from("other"), "b"));
        assert_eq!(scheduler.active_len(), 0);

        scheduler.activate(key("a"));
        let mut remaining = HashMap::from([("a".to_string(), 9)]);
        pass(&mut scheduler, &mut remaining, &mut Vec::new());
        scheduler.reset();
        assert_eq!(scheduler.outstanding(), 0);
        assert!(!scheduler.wants_run());
    }
}
