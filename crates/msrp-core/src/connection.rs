//! One transport connection and the sessions multiplexed over it.
//!
//! The connection is the entry point the I/O driver talks to: it feeds
//! received frames in with [`Connection::on_message`], reports transport
//! lifecycle with [`Connection::on_open`] / [`Connection::on_close`], and
//! calls [`Connection::tick`] when [`Connection::next_deadline`] passes.
//! Everything runs on the caller's thread; nothing here blocks.

use std::collections::HashMap;
use std::time::Instant;

use msrp_crypto::Credentials;

use crate::codec::{decode, encode_request, encode_response};
use crate::config::Config;
use crate::error::{Error, Result, SessionError};
use crate::events::SessionObserver;
use crate::message::{Header, Message, Method, Request, Response, status};
use crate::scheduler::{Scheduler, SenderKey, Step};
use crate::sdp::FileSelector;
use crate::session::{Answer, ChunkStep, Context, Outgoing, Session, SessionId, SessionState};
use crate::transaction::{Transaction, TransactionKind, TransactionTable};
use crate::transfer::PayloadSource;
use crate::transport::{Transport, TransportError};
use crate::uri::MsrpUri;

/// Sessions, pending transactions and the send scheduler of one transport
pub struct Connection<T: Transport> {
    transport: T,
    config: Config,
    credentials: Option<Credentials>,
    sessions: HashMap<SessionId, Session>,
    transactions: TransactionTable,
    scheduler: Scheduler,
    open: bool,
}

impl<T: Transport> Connection<T> {
    /// Create a connection over `transport`.
    ///
    /// The transport is assumed closed until [`on_open`](Self::on_open).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` fails validation.
    pub fn new(transport: T, config: Config) -> Result<Self> {
        config.validate()?;
        let credentials = config
            .username
            .as_ref()
            .map(|user| Credentials::new(user.clone(), config.password.clone().unwrap_or_default()));
        Ok(Self {
            transport,
            credentials,
            sessions: HashMap::new(),
            transactions: TransactionTable::new(config.transaction_timeout),
            scheduler: Scheduler::new(config.max_outstanding_sends),
            open: false,
            config,
        })
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the transport is open
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Look up a session
    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Iterate over all sessions
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Unanswered SEND requests
    pub fn outstanding_sends(&self) -> usize {
        self.scheduler.outstanding()
    }

    /// Pending requests of any kind
    pub fn pending_transactions(&self) -> usize {
        self.transactions.len()
    }

    // ------------------------------------------------------------------
    // Session operations
    // ------------------------------------------------------------------

    /// Create a session. It starts connecting right away if the transport is open.
    pub fn create_session(&mut self, observer: Box<dyn SessionObserver>, now: Instant) -> SessionId {
        let id = SessionId::generate();
        let host = self
            .config
            .authority
            .clone()
            .unwrap_or_else(|| format!("{}.invalid", msrp_crypto::random::random_token(12).to_ascii_lowercase()));
        let local_uri = MsrpUri::new(
            self.config.secure,
            host,
            Some(self.config.port),
            id.as_str(),
            self.config.transport.clone(),
        );
        let relay_uri = self.config.relay_uri().ok().flatten();
        tracing::info!(session = %id, uri = %local_uri, relay = ?relay_uri.as_ref().map(ToString::to_string), "session created");

        let session = Session::new(id.clone(), local_uri, relay_uri, self.config.auth_expires, observer);
        self.sessions.insert(id.clone(), session);
        if self.open {
            self.notify(&id, now, |session, ctx| session.connect(ctx));
        }
        id
    }

    /// SDP offer for a message session.
    ///
    /// # Errors
    ///
    /// Fails for an unknown session or before the relay path is known.
    pub fn create_offer(&self, id: &SessionId) -> Result<String> {
        let session = self.get(id)?;
        Ok(session.create_offer(&self.config)?)
    }

    /// SDP offer pushing a file; the transfer starts when the answer arrives.
    ///
    /// # Errors
    ///
    /// Fails for an unknown session or before the relay path is known.
    pub fn create_file_offer(
        &mut self,
        id: &SessionId,
        source: Box<dyn PayloadSource>,
        selector: FileSelector,
        disposition: Option<String>,
    ) -> Result<String> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        Ok(session.create_file_offer(&self.config, source, selector, disposition)?)
    }

    /// Apply the peer's SDP answer. Returns the id of the message started
    /// to bind the connection, if any.
    ///
    /// # Errors
    ///
    /// Fails for an unknown session, a malformed answer, or an answer
    /// without an acceptable MSRP media line.
    pub fn process_answer(&mut self, id: &SessionId, sdp: &str, now: Instant) -> Result<Option<String>> {
        let started = self.with_session(id, now, |session, ctx| session.process_answer(sdp, ctx))??;
        self.schedule(now);
        Ok(started)
    }

    /// Answer the peer's SDP offer.
    ///
    /// # Errors
    ///
    /// Fails for an unknown session, a malformed offer, or an offer without
    /// an MSRP media line.
    pub fn process_offer(&mut self, id: &SessionId, sdp: &str, now: Instant) -> Result<Answer> {
        let answer = self.with_session(id, now, |session, ctx| session.process_offer(sdp, ctx))??;
        self.schedule(now);
        Ok(answer)
    }

    /// Accept the file the peer offered.
    ///
    /// # Errors
    ///
    /// Fails for an unknown session or one without a file offer.
    pub fn accept_file_transfer(&mut self, id: &SessionId) -> Result<()> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        Ok(session.accept_file_transfer()?)
    }

    /// Queue an in-memory message. Returns its message id.
    ///
    /// # Errors
    ///
    /// Fails unless the session is established and the peer accepts
    /// `content_type`.
    pub fn send_message(&mut self, id: &SessionId, body: Vec<u8>, content_type: &str, now: Instant) -> Result<String> {
        self.send_payload(id, Box::new(body), content_type, Vec::new(), now)
    }

    /// Queue a message read from `source`, with extra MIME headers sent on
    /// its first chunk. Returns its message id.
    ///
    /// # Errors
    ///
    /// Fails unless the session is established and the peer accepts
    /// `content_type`.
    pub fn send_payload(
        &mut self,
        id: &SessionId,
        source: Box<dyn PayloadSource>,
        content_type: &str,
        headers: Vec<Header>,
        now: Instant,
    ) -> Result<String> {
        let message_id = self.with_session(id, now, |session, ctx| session.send(source, content_type, headers, ctx))??;
        self.schedule(now);
        Ok(message_id)
    }

    /// Abort an outgoing message. An abort chunk is sent if the message
    /// was not fully transmitted yet.
    ///
    /// # Errors
    ///
    /// Fails for an unknown session or message.
    pub fn abort_send(&mut self, id: &SessionId, message_id: &str, now: Instant) -> Result<()> {
        self.with_session(id, now, |session, ctx| session.abort_send(message_id, ctx))??;
        self.schedule(now);
        Ok(())
    }

    /// Abort an incoming message.
    ///
    /// # Errors
    ///
    /// Fails for an unknown session or message.
    pub fn abort_receive(&mut self, id: &SessionId, message_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        Ok(session.abort_receive(message_id)?)
    }

    /// Close and forget a session.
    ///
    /// # Errors
    ///
    /// Fails for an unknown session.
    pub fn close_session(&mut self, id: &SessionId) -> Result<()> {
        let mut session = self
            .sessions
            .remove(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        session.close();
        self.transactions.drop_session(id);
        self.scheduler.remove_session(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    /// Transport connected (or reconnected)
    pub fn on_open(&mut self, now: Instant) {
        tracing::info!(sessions = self.sessions.len(), "transport open");
        self.open = true;
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.notify(&id, now, |session, ctx| session.connect(ctx));
        }
        self.schedule(now);
    }

    /// One complete frame arrived.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for a frame that cannot be decoded; the
    /// connection state is unchanged in that case.
    pub fn on_message(&mut self, frame: &[u8], now: Instant) -> Result<()> {
        match decode(frame)? {
            Message::Request(request) => self.route_request(request, now),
            Message::Response(response) => self.route_response(response, now),
        }
        Ok(())
    }

    /// Transport failed; treated as a close
    pub fn on_error(&mut self, error: &TransportError, now: Instant) {
        tracing::error!(error = %error, "transport error");
        self.on_close(now);
    }

    /// Transport closed. Sessions fall back to `AwaitConnect`; their
    /// transfers resume on the next [`on_open`](Self::on_open).
    pub fn on_close(&mut self, _now: Instant) {
        if self.open {
            tracing::info!(pending = self.transactions.len(), "transport closed");
        }
        self.open = false;
        self.transactions.clear();
        self.scheduler.reset();
        for session in self.sessions.values_mut() {
            session.disconnect();
        }
    }

    // ------------------------------------------------------------------
    // Timers and scheduling
    // ------------------------------------------------------------------

    /// Expire transactions, run session timers, then a scheduling pass
    pub fn tick(&mut self, now: Instant) {
        for (tid, transaction) in self.transactions.expire(now) {
            tracing::warn!(tid = %tid, session = %transaction.session, kind = ?transaction.kind, "transaction timed out");
            let response = Response {
                tid,
                status: status::REQUEST_TIMEOUT,
                comment: Some(status::reason(status::REQUEST_TIMEOUT).to_string()),
                to_path: Vec::new(),
                from_path: Vec::new(),
                headers: Default::default(),
            };
            self.dispatch_response(transaction, &response, now);
        }

        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.notify(&id, now, |session, ctx| session.tick(ctx));
        }
        self.schedule(now);
    }

    /// Run one scheduling pass. Returns the number of chunks sent.
    pub fn schedule(&mut self, now: Instant) -> usize {
        if !self.open {
            return 0;
        }
        let Self {
            transport,
            sessions,
            transactions,
            scheduler,
            ..
        } = self;
        scheduler.run(|key| {
            let Some(session) = sessions.get_mut(&key.session) else {
                return Step::Gone;
            };
            match session.produce_chunk(&key.message_id, now) {
                ChunkStep::Gone => Step::Gone,
                ChunkStep::Ready {
                    request,
                    last,
                    send_complete,
                } => {
                    let kind = TransactionKind::Send {
                        message_id: key.message_id.clone(),
                        last_chunk: last,
                    };
                    dispatch_request(transport, transactions, &key.session, request, Some(kind), now);
                    Step::Sent { send_complete }
                }
            }
        })
    }

    /// Whether a scheduling pass would send anything
    pub fn wants_schedule(&self) -> bool {
        self.open && self.scheduler.wants_run()
    }

    /// Earliest instant [`tick`](Self::tick) has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(Session::next_deadline)
            .chain(self.transactions.next_deadline())
            .min()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn get(&self, id: &SessionId) -> std::result::Result<&Session, SessionError> {
        self.sessions
            .get(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
    }

    /// Run `f` against one session, then put its frames on the wire and its
    /// senders on the scheduler
    fn with_session<R>(
        &mut self,
        id: &SessionId,
        now: Instant,
        f: impl FnOnce(&mut Session, &mut Context<'_>) -> R,
    ) -> std::result::Result<R, Error> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        let mut ctx = Context::new(&self.config, self.credentials.as_ref(), now);
        let result = f(session, &mut ctx);
        let Context { out, activate, .. } = ctx;
        let terminal = session.state().is_terminal();

        for outgoing in out {
            match outgoing {
                Outgoing::Request { request, kind } => {
                    dispatch_request(&mut self.transport, &mut self.transactions, id, request, kind, now);
                }
                Outgoing::Response(response) => send_response(&mut self.transport, &response),
            }
        }
        for message_id in activate {
            self.scheduler.activate(SenderKey::new(id.clone(), message_id));
        }
        if terminal {
            self.transactions.drop_session(id);
            self.scheduler.remove_session(id);
        }
        Ok(result)
    }

    /// [`with_session`](Self::with_session) for events nobody waits on
    fn notify(&mut self, id: &SessionId, now: Instant, f: impl FnOnce(&mut Session, &mut Context<'_>)) {
        if let Err(e) = self.with_session(id, now, f) {
            tracing::debug!(session = %id, error = %e, "event for missing session dropped");
        }
    }

    fn route_request(&mut self, request: Request, now: Instant) {
        tracing::debug!(tid = %request.tid, method = %request.method.as_str(), "request received");
        if request.to_path.len() != 1 {
            tracing::warn!(tid = %request.tid, hops = request.to_path.len(), "To-Path must name exactly one URI");
            self.reject(&request, status::BAD_REQUEST);
            return;
        }
        let target = match MsrpUri::parse(&request.to_path[0]) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(tid = %request.tid, error = %e, "bad To-Path");
                self.reject(&request, status::BAD_REQUEST);
                return;
            }
        };
        let Some(id) = self
            .sessions
            .values()
            .find(|s| !s.state().is_terminal() && s.local_uri() == &target)
            .map(|s| s.id().clone())
        else {
            tracing::debug!(tid = %request.tid, to = %target, "no session for request");
            self.reject(&request, status::SESSION_DOES_NOT_EXIST);
            return;
        };

        match request.method {
            Method::Send | Method::Report => {
                self.notify(&id, now, |session, ctx| session.handle_request(request, ctx));
                self.schedule(now);
            }
            Method::Auth | Method::Other(_) => self.reject(&request, status::NOT_IMPLEMENTED),
        }
    }

    fn reject(&mut self, request: &Request, code: u16) {
        if request.method == Method::Report || !request.headers.failure_report().respond_on_failure() {
            return;
        }
        send_response(&mut self.transport, &request.response(code));
    }

    fn route_response(&mut self, response: Response, now: Instant) {
        let Some(transaction) = self.transactions.complete(&response.tid) else {
            tracing::debug!(tid = %response.tid, status = response.status, "response matches no transaction");
            return;
        };
        tracing::debug!(tid = %response.tid, status = response.status, "response received");
        self.dispatch_response(transaction, &response, now);
    }

    fn dispatch_response(&mut self, transaction: Transaction, response: &Response, now: Instant) {
        let Transaction { session, kind, .. } = transaction;
        match kind {
            TransactionKind::Auth => {
                self.notify(&session, now, |s, ctx| s.on_auth_response(response, ctx));
            }
            TransactionKind::Send { message_id, last_chunk } => {
                self.scheduler.on_response();
                self.notify(&session, now, |s, ctx| {
                    s.on_send_response(&message_id, last_chunk, response, ctx);
                });
                self.schedule(now);
            }
        }
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.open)
            .field("sessions", &self.sessions.len())
            .field("transactions", &self.transactions.len())
            .field("outstanding", &self.scheduler.outstanding())
            .finish_non_exhaustive()
    }
}

/// Encode a request, register its transaction and hand it to the transport
fn dispatch_request<T: Transport>(
    transport: &mut T,
    transactions: &mut TransactionTable,
    session: &SessionId,
    mut request: Request,
    kind: Option<TransactionKind>,
    now: Instant,
) {
    let frame = loop {
        let frame = encode_request(&mut request);
        if kind.is_none() || !transactions.contains(&request.tid) {
            break frame;
        }
        request.tid = msrp_crypto::random::transaction_id();
    };
    if let Some(kind) = kind {
        transactions.register(&request.tid, session.clone(), kind, now);
    }
    tracing::trace!(tid = %request.tid, bytes = frame.len(), "request out");
    if let Err(e) = transport.send(frame) {
        tracing::warn!(tid = %request.tid, error = %e, "failed to send request");
    }
}

fn send_response<T: Transport>(transport: &mut T, response: &Response) {
    let frame = encode_response(response);
    tracing::trace!(tid = %response.tid, status = response.status, "response out");
    if let Err(e) = transport.send(frame) {
        tracing::warn!(tid = %response.tid, error = %e, "failed to send response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::MemoryTransport;

    fn connection() -> Connection<MemoryTransport> {
        Connection::new(MemoryTransport::new(), Config::default()).unwrap()
    }

    fn responses(conn: &mut Connection<MemoryTransport>) -> Vec<Response> {
        conn.transport_mut()
            .take_frames()
            .iter()
            .filter_map(|f| match decode(f).unwrap() {
                Message::Response(r) => Some(r),
                Message::Request(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        assert!(matches!(
            Connection::new(MemoryTransport::new(), config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_event_for_closed_session_is_dropped() {
        let now = Instant::now();
        let mut conn = connection();
        conn.on_open(now);
        let id = conn.create_session(Box::new(NullObserver), now);
        conn.close_session(&id).unwrap();

        let mut ran = false;
        conn.notify(&id, now, |_, _| ran = true);
        assert!(!ran);
        assert!(conn.transport_mut().take_frames().is_empty());
        assert!(conn.session(&id).is_none());
    }

    #[test]
    fn test_session_waits_for_open() {
        let now = Instant::now();
        let mut conn = connection();
        let id = conn.create_session(Box::new(NullObserver), now);
        assert_eq!(conn.session(&id).unwrap().state(), SessionState::AwaitConnect);
        conn.on_open(now);
        assert_eq!(conn.session(&id).unwrap().state(), SessionState::AwaitSdp);
        conn.on_close(now);
        assert_eq!(conn.session(&id).unwrap().state(), SessionState::AwaitConnect);
    }

    #[test]
    fn test_unknown_session_gets_481() {
        let now = Instant::now();
        let mut conn = connection();
        conn.on_open(now);
        let frame = b"MSRP a786hjs2 SEND\r\n\
To-Path: msrp://bob.example.com:8888/9di4eae923wzd;tcp\r\n\
From-Path: msrp://alicepc.example.com:7777/iau39soe2843z;tcp\r\n\
Message-ID: 87652491\r\n\
Byte-Range: 1-5/5\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello\r\n\
-------a786hjs2$\r\n";
        conn.on_message(frame, now).unwrap();
        let out = responses(&mut conn);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].status, status::SESSION_DOES_NOT_EXIST);
        assert_eq!(out[0].tid, "a786hjs2");
        assert_eq!(out[0].to_path, vec!["msrp://alicepc.example.com:7777/iau39soe2843z;tcp"]);
    }

    #[test]
    fn test_multi_hop_to_path_gets_400() {
        let now = Instant::now();
        let mut conn = connection();
        conn.on_open(now);
        let frame = b"MSRP t1 SEND\r\n\
To-Path: msrp://relay.example.com;tcp msrp://bob.example.com:8888/s;tcp\r\n\
From-Path: msrp://alice.example.com:7777/a;tcp\r\n\
Message-ID: m1\r\n\
-------t1$\r\n";
        conn.on_message(frame, now).unwrap();
        let out = responses(&mut conn);
        assert_eq!(out[0].status, status::BAD_REQUEST);
    }

    #[test]
    fn test_unanswered_report() {
        let now = Instant::now();
        let mut conn = connection();
        conn.on_open(now);
        let frame = b"MSRP t2 REPORT\r\n\
To-Path: msrp://bob.example.com:8888/nosuch;tcp\r\n\
From-Path: msrp://alice.example.com:7777/a;tcp\r\n\
Message-ID: m1\r\n\
Byte-Range: 1-5/5\r\n\
Status: 000 200 OK\r\n\
-------t2$\r\n";
        conn.on_message(frame, now).unwrap();
        assert_eq!(conn.transport().pending(), 0);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let now = Instant::now();
        let mut conn = connection();
        assert!(matches!(conn.on_message(b"HTTP/1.1 200 OK\r\n\r\n", now), Err(Error::Parse(_))));
    }

    #[test]
    fn test_unknown_session_operations_fail() {
        let now = Instant::now();
        let mut conn = connection();
        let ghost = SessionId::from("ghost");
        assert!(conn.create_offer(&ghost).is_err());
        assert!(conn.send_message(&ghost, b"x".to_vec(), "text/plain", now).is_err());
        assert!(conn.close_session(&ghost).is_err());
    }
}
