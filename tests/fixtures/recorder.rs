//! Observer that records notifications for later assertions.

use std::cell::RefCell;
use std::rc::Rc;

use msrp_core::{FirstChunk, IncomingMessage, Outcome, Progress, SessionId, SessionObserver, SessionState};

/// One recorded notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    State(SessionState),
    Authenticated,
    FirstChunk(FirstChunk),
    ChunkReceived { message_id: String, progress: Progress },
    Received(IncomingMessage),
    Sent { message_id: String, progress: Progress },
    Delivered(String),
    SendFailed { message_id: String, status: u16, reason: String },
    ReceiveAborted(String),
    ReceiveTimeout(String),
}

#[derive(Debug, Default)]
struct Inner {
    log: Vec<Recorded>,
    first_chunk_verdict: Outcome,
    message_verdict: Outcome,
}

/// Shared handle to a recording observer
#[derive(Debug, Clone, Default)]
pub struct Recorder(Rc<RefCell<Inner>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer feeding this recorder
    pub fn observer(&self) -> Box<dyn SessionObserver> {
        Box::new(self.clone())
    }

    /// Verdict returned for first chunks
    pub fn set_first_chunk_verdict(&self, outcome: Outcome) {
        self.0.borrow_mut().first_chunk_verdict = outcome;
    }

    /// Verdict returned for complete messages
    pub fn set_message_verdict(&self, outcome: Outcome) {
        self.0.borrow_mut().message_verdict = outcome;
    }

    pub fn log(&self) -> Vec<Recorded> {
        self.0.borrow().log.clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().log.clear();
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.filter(|r| match r {
            Recorded::State(s) => Some(*s),
            _ => None,
        })
    }

    pub fn received(&self) -> Vec<IncomingMessage> {
        self.filter(|r| match r {
            Recorded::Received(m) => Some(m.clone()),
            _ => None,
        })
    }

    pub fn delivered(&self) -> Vec<String> {
        self.filter(|r| match r {
            Recorded::Delivered(id) => Some(id.clone()),
            _ => None,
        })
    }

    /// `(message_id, status, reason)` of every failed send
    pub fn failures(&self) -> Vec<(String, u16, String)> {
        self.filter(|r| match r {
            Recorded::SendFailed {
                message_id,
                status,
                reason,
            } => Some((message_id.clone(), *status, reason.clone())),
            _ => None,
        })
    }

    pub fn contains(&self, wanted: &Recorded) -> bool {
        self.0.borrow().log.iter().any(|r| r == wanted)
    }

    fn filter<T>(&self, f: impl Fn(&Recorded) -> Option<T>) -> Vec<T> {
        self.0.borrow().log.iter().filter_map(f).collect()
    }

    fn push(&self, recorded: Recorded) {
        self.0.borrow_mut().log.push(recorded);
    }
}

impl SessionObserver for Recorder {
    fn on_state_changed(&mut self, _session: &SessionId, state: SessionState) {
        self.push(Recorded::State(state));
    }

    fn on_authenticated(&mut self, _session: &SessionId) {
        self.push(Recorded::Authenticated);
    }

    fn on_first_chunk(&mut self, _session: &SessionId, chunk: &FirstChunk) -> Outcome {
        self.push(Recorded::FirstChunk(chunk.clone()));
        self.0.borrow().first_chunk_verdict.clone()
    }

    fn on_chunk_received(&mut self, _session: &SessionId, message_id: &str, progress: Progress) {
        self.push(Recorded::ChunkReceived {
            message_id: message_id.to_string(),
            progress,
        });
    }

    fn on_message_received(&mut self, _session: &SessionId, message: IncomingMessage) -> Outcome {
        self.push(Recorded::Received(message));
        self.0.borrow().message_verdict.clone()
    }

    fn on_message_sent(&mut self, _session: &SessionId, message_id: &str, progress: Progress) {
        self.push(Recorded::Sent {
            message_id: message_id.to_string(),
            progress,
        });
    }

    fn on_message_delivered(&mut self, _session: &SessionId, message_id: &str) {
        self.push(Recorded::Delivered(message_id.to_string()));
    }

    fn on_message_send_failed(&mut self, _session: &SessionId, message_id: &str, status: u16, reason: &str) {
        self.push(Recorded::SendFailed {
            message_id: message_id.to_string(),
            status,
            reason: reason.to_string(),
        });
    }

    fn on_receive_aborted(&mut self, _session: &SessionId, message_id: &str) {
        self.push(Recorded::ReceiveAborted(message_id.to_string()));
    }

    fn on_receive_timeout(&mut self, _session: &SessionId, message_id: &str) {
        self.push(Recorded::ReceiveTimeout(message_id.to_string()));
    }
}
