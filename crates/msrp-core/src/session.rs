//! Session state machine.
//!
//! A session is one MSRP endpoint owned by a [`Connection`](crate::Connection).
//! It authenticates to the configured relay (RFC 4976), negotiates the peer
//! path through SDP offer/answer, and owns the senders and receivers of its
//! messages.
//!
//! ```text
//! AWAIT_CONNECT -> AWAIT_CHALLENGE -> AWAIT_AUTH_RES -> AWAIT_SDP -> ESTABLISHED
//!        \______________________________________________/
//!                       (no relay configured)
//! terminal: AUTH_FAILED, ERROR, CLOSED
//! ```
//!
//! Sessions never touch the transport. Frames they want sent are collected
//! in a [`Context`] that the connection drains after each call.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use msrp_crypto::{Credentials, DigestChallenge, DigestResponse};

use crate::config::Config;
use crate::error::SessionError;
use crate::events::{FirstChunk, IncomingMessage, Outcome, Progress, SessionObserver};
use crate::message::{ByteRange, FailureReport, Flag, Header, Method, ReportStatus, Request, Response, status};
use crate::sdp::{Attribute, Direction, FileSelector, FileTransfer, MediaDescription, SessionDescription};
use crate::transaction::TransactionKind;
use crate::transfer::{Chunk, ChunkReceiver, ChunkSender, PayloadSource, ReportOutcome};
use crate::uri::MsrpUri;

/// Interval of the receiver inactivity sweep
pub const RECEIVER_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Re-authentication happens this long before the registration expires
pub const REAUTH_MARGIN: Duration = Duration::from_secs(30);

/// Local session identifier (the session-id part of the local URI)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(msrp_crypto::random::session_id())
    }

    /// Identifier text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Waiting for the transport to open
    AwaitConnect,
    /// AUTH sent, expecting a 401 challenge
    AwaitChallenge,
    /// Credentials sent, expecting the relay's verdict
    AwaitAuthRes,
    /// Relay path known, waiting for SDP negotiation
    AwaitSdp,
    /// Far-end path negotiated; messages flow
    Established,
    /// Relay refused the credentials
    AuthFailed,
    /// Unrecoverable protocol failure
    Error,
    /// Closed by the consumer
    Closed,
}

impl SessionState {
    /// `AuthFailed`, `Error` or `Closed`
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AuthFailed | Self::Error | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitConnect => "AWAIT_CONNECT",
            Self::AwaitChallenge => "AWAIT_CHALLENGE",
            Self::AwaitAuthRes => "AWAIT_AUTH_RES",
            Self::AwaitSdp => "AWAIT_SDP",
            Self::Established => "ESTABLISHED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::Error => "ERROR",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Progress of an AUTH exchange, tracked apart from [`SessionState`] so that
/// re-authentication does not leave `Established`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthPhase {
    Idle,
    AwaitChallenge,
    AwaitAuthRes,
}

/// SDP answer produced by [`Session::process_offer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Serialized answer
    pub sdp: String,
    /// File offered by the peer; must be accepted before chunks are taken
    pub file: Option<FileTransfer>,
}

/// A frame a session wants on the wire
#[derive(Debug)]
pub(crate) enum Outgoing {
    /// Request; `kind` is `None` for REPORT, which solicits no response
    Request {
        request: Request,
        kind: Option<TransactionKind>,
    },
    /// Response to a received request
    Response(Response),
}

/// Per-call environment handed to a session by its connection
pub(crate) struct Context<'a> {
    pub config: &'a Config,
    pub credentials: Option<&'a Credentials>,
    pub now: Instant,
    pub out: Vec<Outgoing>,
    pub activate: Vec<String>,
}

impl<'a> Context<'a> {
    pub fn new(config: &'a Config, credentials: Option<&'a Credentials>, now: Instant) -> Self {
        Self {
            config,
            credentials,
            now,
            out: Vec::new(),
            activate: Vec::new(),
        }
    }
}

/// Result of asking a session for the next chunk of a sender
#[derive(Debug)]
pub(crate) enum ChunkStep {
    Gone,
    Ready {
        request: Request,
        last: bool,
        send_complete: bool,
    },
}

struct PendingFile {
    source: Box<dyn PayloadSource>,
    content_type: String,
    transfer: FileTransfer,
}

/// Whether `content_type` matches one of `accept` (`*` and `type/*` allowed)
#[must_use]
pub fn accepts_media_type(accept: &[String], content_type: &str) -> bool {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    accept.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern == "*" {
            return true;
        }
        match pattern.strip_suffix("/*") {
            Some(major) => media.split('/').next() == Some(major),
            None => pattern == media,
        }
    })
}

/// A single MSRP session
pub struct Session {
    id: SessionId,
    local_uri: MsrpUri,
    relay_uri: Option<MsrpUri>,
    relay_path: Vec<String>,
    far_path: Vec<String>,
    state: SessionState,

    auth: AuthPhase,
    challenge: Option<DigestChallenge>,
    nonce_count: u32,
    requested_expires: Option<u32>,
    interval_retried: bool,
    reauth_at: Option<Instant>,

    remote_accept_types: Vec<String>,
    remote_accept_wrapped_types: Vec<String>,
    senders: HashMap<String, ChunkSender>,
    receivers: HashMap<String, ChunkReceiver>,
    next_sweep: Option<Instant>,

    pending_file: Option<PendingFile>,
    file_offer: Option<FileTransfer>,
    file_accepted: bool,

    observer: Box<dyn SessionObserver>,
}

impl Session {
    /// Create a session in `AwaitConnect`
    #[must_use]
    pub fn new(
        id: SessionId,
        local_uri: MsrpUri,
        relay_uri: Option<MsrpUri>,
        requested_expires: Option<u32>,
        observer: Box<dyn SessionObserver>,
    ) -> Self {
        Self {
            id,
            local_uri,
            relay_uri,
            relay_path: Vec::new(),
            far_path: Vec::new(),
            state: SessionState::AwaitConnect,
            auth: AuthPhase::Idle,
            challenge: None,
            nonce_count: 0,
            requested_expires,
            interval_retried: false,
            reauth_at: None,
            remote_accept_types: Vec::new(),
            remote_accept_wrapped_types: Vec::new(),
            senders: HashMap::new(),
            receivers: HashMap::new(),
            next_sweep: None,
            pending_file: None,
            file_offer: None,
            file_accepted: false,
            observer,
        }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Local endpoint URI
    #[must_use]
    pub fn local_uri(&self) -> &MsrpUri {
        &self.local_uri
    }

    /// Relay path learned from `Use-Path`
    #[must_use]
    pub fn relay_path(&self) -> &[String] {
        &self.relay_path
    }

    /// Far-end path learned from SDP
    #[must_use]
    pub fn far_path(&self) -> &[String] {
        &self.far_path
    }

    /// `To-Path` of outgoing requests: relay path, then far-end path
    #[must_use]
    pub fn to_path(&self) -> Vec<String> {
        self.relay_path.iter().chain(&self.far_path).cloned().collect()
    }

    /// Media types the peer accepts
    #[must_use]
    pub fn remote_accept_types(&self) -> &[String] {
        &self.remote_accept_types
    }

    /// Media types the peer accepts inside wrappers
    #[must_use]
    pub fn remote_accept_wrapped_types(&self) -> &[String] {
        &self.remote_accept_wrapped_types
    }

    /// Outgoing message state
    #[must_use]
    pub fn sender(&self, message_id: &str) -> Option<&ChunkSender> {
        self.senders.get(message_id)
    }

    /// Incoming message state
    #[must_use]
    pub fn receiver(&self, message_id: &str) -> Option<&ChunkReceiver> {
        self.receivers.get(message_id)
    }

    /// Number of live senders
    #[must_use]
    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }

    /// Number of live receivers
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    /// File offered by the peer, if any
    #[must_use]
    pub fn file_offer(&self) -> Option<&FileTransfer> {
        self.file_offer.as_ref()
    }

    /// Check if a state transition is valid
    #[must_use]
    pub fn can_transition(&self, to: SessionState) -> bool {
        use SessionState::{AuthFailed, AwaitAuthRes, AwaitChallenge, AwaitConnect, AwaitSdp, Closed, Error, Established};
        match (self.state, to) {
            (from, to) if from == to => true,
            (Closed, _) => false,
            (_, Closed) => true,
            (AuthFailed | Error, _) => false,
            (_, Error) => true,
            (AwaitConnect, AwaitChallenge | AwaitSdp | Established) => true,
            (AwaitChallenge, AwaitAuthRes | AwaitSdp | Established | AuthFailed | AwaitConnect) => true,
            (AwaitAuthRes, AwaitSdp | Established | AuthFailed | AwaitConnect) => true,
            (AwaitSdp, Established | AuthFailed | AwaitConnect) => true,
            (Established, AuthFailed | AwaitConnect) => true,
            _ => false,
        }
    }

    /// Transition to a new state
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if the transition is not allowed
    /// from the current state.
    pub fn transition_to(&mut self, new_state: SessionState) -> Result<(), SessionError> {
        if !self.can_transition(new_state) {
            return Err(SessionError::InvalidState("transition not allowed"));
        }
        if self.state == new_state {
            return Ok(());
        }
        let old_state = self.state;
        self.state = new_state;
        tracing::info!(session = %self.id, from = %old_state, to = %new_state, "session state transition");
        self.observer.on_state_changed(&self.id, new_state);
        Ok(())
    }

    fn set_state(&mut self, new_state: SessionState) {
        if let Err(e) = self.transition_to(new_state) {
            tracing::warn!(session = %self.id, from = %self.state, to = %new_state, error = %e, "ignored state change");
        }
    }

    fn require_state(&self, allowed: &[SessionState], operation: &'static str) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState(operation))
        }
    }

    fn local_path(&self) -> Vec<String> {
        vec![self.local_uri.to_string()]
    }

    /// Hard failure: notify pending sends, drop transfer state, enter `state`
    pub(crate) fn fail(&mut self, state: SessionState, reason: &str) {
        tracing::error!(session = %self.id, state = %state, reason, "session failed");
        for (message_id, _) in self.senders.drain() {
            self.observer
                .on_message_send_failed(&self.id, &message_id, status::INTERNAL_ERROR, reason);
        }
        self.receivers.clear();
        self.auth = AuthPhase::Idle;
        self.reauth_at = None;
        self.next_sweep = None;
        self.set_state(state);
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Transport opened
    pub(crate) fn connect(&mut self, ctx: &mut Context<'_>) {
        if self.state != SessionState::AwaitConnect {
            return;
        }
        if self.relay_uri.is_some() {
            self.start_auth(ctx);
        } else if self.far_path.is_empty() {
            self.set_state(SessionState::AwaitSdp);
        } else {
            self.enter_established(ctx);
        }
    }

    /// Transport closed: keep transfers, forget the exchange in progress
    pub(crate) fn disconnect(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.auth = AuthPhase::Idle;
        self.reauth_at = None;
        self.set_state(SessionState::AwaitConnect);
    }

    /// Consumer closed the session
    pub(crate) fn close(&mut self) {
        self.senders.clear();
        self.receivers.clear();
        self.reauth_at = None;
        self.next_sweep = None;
        self.set_state(SessionState::Closed);
    }

    fn enter_established(&mut self, ctx: &mut Context<'_>) {
        self.set_state(SessionState::Established);
        for (message_id, sender) in &mut self.senders {
            sender.resume();
            tracing::debug!(session = %self.id, message_id = %message_id, acked = sender.acked_bytes(), "resuming sender");
            ctx.activate.push(message_id.clone());
        }
    }

    // ------------------------------------------------------------------
    // Relay authentication
    // ------------------------------------------------------------------

    fn start_auth(&mut self, ctx: &mut Context<'_>) {
        self.auth = AuthPhase::AwaitChallenge;
        self.challenge = None;
        self.nonce_count = 0;
        self.interval_retried = false;
        if self.state != SessionState::Established && self.state != SessionState::AwaitSdp {
            self.set_state(SessionState::AwaitChallenge);
        }
        self.send_auth(None, ctx);
    }

    fn send_auth(&mut self, authorization: Option<String>, ctx: &mut Context<'_>) {
        let Some(relay) = &self.relay_uri else {
            return;
        };
        let mut request = Request::new(Method::Auth, vec![relay.to_string()], self.local_path());
        if let Some(authorization) = authorization {
            request.headers.push(Header::Authorization(authorization));
        }
        if let Some(expires) = self.requested_expires {
            request.headers.push(Header::Expires(expires));
        }
        tracing::debug!(session = %self.id, tid = %request.tid, relay = %relay, "sending AUTH");
        ctx.out.push(Outgoing::Request {
            request,
            kind: Some(TransactionKind::Auth),
        });
    }

    fn authorization(&mut self, ctx: &Context<'_>) -> Result<Option<String>, String> {
        let Some(challenge) = &self.challenge else {
            return Ok(None);
        };
        let credentials = ctx.credentials.ok_or("no credentials configured")?;
        let relay = self.relay_uri.as_ref().ok_or("no relay configured")?;
        self.nonce_count += 1;
        let cnonce = msrp_crypto::random::client_nonce().map_err(|e| e.to_string())?;
        let response = DigestResponse::compute(
            challenge,
            credentials,
            &ctx.config.digest_method,
            &relay.to_string(),
            self.nonce_count,
            &cnonce,
        )
        .map_err(|e| e.to_string())?;
        Ok(Some(response.to_string()))
    }

    /// Response to an AUTH request (or its synthesized timeout)
    pub(crate) fn on_auth_response(&mut self, response: &Response, ctx: &mut Context<'_>) {
        if self.auth == AuthPhase::Idle {
            tracing::debug!(session = %self.id, tid = %response.tid, "ignoring stale AUTH response");
            return;
        }

        match response.status {
            status::UNAUTHORIZED => {
                if self.auth == AuthPhase::AwaitAuthRes {
                    self.fail(SessionState::AuthFailed, "relay rejected credentials");
                    return;
                }
                let Some(challenge) = response.headers.www_authenticate() else {
                    self.fail(SessionState::AuthFailed, "401 without digest challenge");
                    return;
                };
                tracing::debug!(session = %self.id, realm = %challenge.realm, "received digest challenge");
                self.challenge = Some(challenge);
                self.nonce_count = 0;
                match self.authorization(ctx) {
                    Ok(authorization) => {
                        self.auth = AuthPhase::AwaitAuthRes;
                        if self.state == SessionState::AwaitChallenge {
                            self.set_state(SessionState::AwaitAuthRes);
                        }
                        self.send_auth(authorization, ctx);
                    }
                    Err(reason) => self.fail(SessionState::AuthFailed, &reason),
                }
            }
            status::INTERVAL_OUT_OF_BOUNDS => {
                if self.interval_retried {
                    self.fail(SessionState::AuthFailed, "relay rejected expiry interval twice");
                    return;
                }
                let min = response.headers.min_expires();
                let max = response.headers.max_expires();
                let mut expires = self.requested_expires.or(max).or(min).unwrap_or_default();
                if let Some(min) = min {
                    expires = expires.max(min);
                }
                if let Some(max) = max {
                    expires = expires.min(max);
                }
                tracing::debug!(session = %self.id, expires, ?min, ?max, "adjusting AUTH expiry");
                self.requested_expires = Some(expires);
                self.interval_retried = true;
                match self.authorization(ctx) {
                    Ok(authorization) => self.send_auth(authorization, ctx),
                    Err(reason) => self.fail(SessionState::AuthFailed, &reason),
                }
            }
            code if status::is_success(code) => {
                let Some(use_path) = response.headers.use_path() else {
                    self.fail(SessionState::Error, "AUTH success without Use-Path");
                    return;
                };
                self.relay_path = use_path;
                self.auth = AuthPhase::Idle;
                let expires = response.headers.expires().or(self.requested_expires);
                self.reauth_at = expires.map(|secs| {
                    let lifetime = Duration::from_secs(u64::from(secs));
                    ctx.now + lifetime.saturating_sub(REAUTH_MARGIN).max(Duration::from_secs(1))
                });
                tracing::info!(session = %self.id, relay_path = ?self.relay_path, ?expires, "authenticated with relay");
                self.observer.on_authenticated(&self.id);
                if self.state != SessionState::Established && self.state != SessionState::AwaitSdp {
                    if self.far_path.is_empty() {
                        self.set_state(SessionState::AwaitSdp);
                    } else {
                        self.enter_established(ctx);
                    }
                }
            }
            status::FORBIDDEN => self.fail(SessionState::AuthFailed, "relay refused AUTH"),
            code => {
                let reason = format!("AUTH failed with {code}");
                self.fail(SessionState::Error, &reason);
            }
        }
    }

    // ------------------------------------------------------------------
    // SDP negotiation
    // ------------------------------------------------------------------

    fn sdp_path(&self) -> Vec<String> {
        self.relay_path
            .iter()
            .rev()
            .cloned()
            .chain(std::iter::once(self.local_uri.to_string()))
            .collect()
    }

    fn message_media(&self, config: &Config) -> MediaDescription {
        let mut media = MediaDescription::message(
            self.local_uri.effective_port(),
            self.local_uri.secure,
            &self.sdp_path(),
            &config.accept_types,
        );
        if !config.accept_wrapped_types.is_empty() {
            media.set_attribute(Attribute::new("accept-wrapped-types", config.accept_wrapped_types.join(" ")));
        }
        media
    }

    fn describe(&self, media: Vec<MediaDescription>) -> String {
        let mut sdp = SessionDescription::new(msrp_crypto::random::session_id(), self.local_uri.host.clone());
        sdp.media = media;
        sdp.to_string()
    }

    /// SDP offer for a message session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` before the relay path is known.
    pub fn create_offer(&self, config: &Config) -> Result<String, SessionError> {
        self.require_state(&[SessionState::AwaitSdp, SessionState::Established], "create_offer")?;
        Ok(self.describe(vec![self.message_media(config)]))
    }

    /// SDP offer pushing a file. The file sender starts once the answer arrives.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` before the relay path is known.
    pub fn create_file_offer(
        &mut self,
        config: &Config,
        source: Box<dyn PayloadSource>,
        mut selector: FileSelector,
        disposition: Option<String>,
    ) -> Result<String, SessionError> {
        self.require_state(&[SessionState::AwaitSdp, SessionState::Established], "create_file_offer")?;
        if selector.size.is_none() {
            selector.size = Some(source.len());
        }
        let content_type = selector
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let transfer = FileTransfer {
            selector,
            transfer_id: Some(msrp_crypto::random::random_token(32)),
            disposition: Some(disposition.unwrap_or_else(|| "attachment".to_string())),
            icon: None,
            direction: Some(Direction::SendOnly),
        };
        let mut media = self.message_media(config);
        media.set_file_transfer(&transfer);
        self.pending_file = Some(PendingFile {
            source,
            content_type,
            transfer,
        });
        Ok(self.describe(vec![media]))
    }

    /// Offerer side: apply the peer's answer.
    ///
    /// Returns the id of the message started to bind the connection (an
    /// empty SEND, or the offered file) when no sender exists yet.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Negotiation` if the answer has no usable MSRP
    /// media section, or [`SessionError::InvalidState`] before AUTH completed.
    pub(crate) fn process_answer(&mut self, sdp: &str, ctx: &mut Context<'_>) -> Result<Option<String>, crate::Error> {
        self.require_state(&[SessionState::AwaitSdp, SessionState::Established], "process_answer")?;
        let answer = SessionDescription::parse(sdp)?;
        let media = answer
            .media
            .iter()
            .find(|m| m.is_msrp() && m.port != 0)
            .ok_or_else(|| SessionError::Negotiation("answer rejected the message stream".into()))?;
        let far_path = media.path();
        if far_path.is_empty() {
            return Err(SessionError::Negotiation("answer without a=path".into()).into());
        }
        self.far_path = far_path;
        self.remote_accept_types = media.accept_types();
        self.remote_accept_wrapped_types = media.accept_wrapped_types();
        tracing::info!(session = %self.id, far_path = ?self.far_path, "answer processed");

        if self.state != SessionState::Established {
            self.enter_established(ctx);
        }
        if !self.senders.is_empty() {
            return Ok(None);
        }

        let message_id = msrp_crypto::random::message_id();
        let sender = match self.pending_file.take() {
            Some(file) => {
                let mut disposition = file.transfer.disposition.clone().unwrap_or_else(|| "attachment".into());
                if let Some(name) = &file.transfer.selector.name {
                    disposition.push_str(&format!("; filename=\"{name}\""));
                }
                ChunkSender::new(
                    message_id.clone(),
                    file.source,
                    file.content_type,
                    ctx.config.chunk_size,
                    ctx.config.report_timeout,
                )
                .with_header(Header::ContentDisposition(disposition))
            }
            None => ChunkSender::ping(message_id.clone()),
        };
        self.senders.insert(message_id.clone(), sender);
        ctx.activate.push(message_id.clone());
        Ok(Some(message_id))
    }

    /// Answerer side: build the answer to the peer's offer.
    ///
    /// The first MSRP media section is accepted; every other section is
    /// rejected with port zero.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Negotiation` if the offer has no usable MSRP
    /// media section.
    pub(crate) fn process_offer(&mut self, sdp: &str, ctx: &mut Context<'_>) -> Result<Answer, crate::Error> {
        self.require_state(&[SessionState::AwaitSdp, SessionState::Established], "process_offer")?;
        let offer = SessionDescription::parse(sdp)?;

        let mut chosen = None;
        let mut answer_media = Vec::with_capacity(offer.media.len());
        for (index, media) in offer.media.iter().enumerate() {
            if chosen.is_none() && media.is_msrp() && media.port != 0 && !media.path().is_empty() {
                chosen = Some(index);
                answer_media.push(self.message_media(ctx.config));
            } else {
                let mut rejected = media.clone();
                rejected.port = 0;
                answer_media.push(rejected);
            }
        }
        let index = chosen.ok_or_else(|| SessionError::Negotiation("offer has no usable message stream".into()))?;
        let offered = &offer.media[index];

        let file = offered.file_transfer()?;
        if let Some(transfer) = &file {
            let mut reply = transfer.clone();
            reply.direction = transfer.direction.map(Direction::reverse);
            reply.icon = None;
            answer_media[index].set_file_transfer(&reply);
            tracing::info!(session = %self.id, name = ?transfer.selector.name, size = ?transfer.selector.size, "file transfer offered");
        }

        self.far_path = offered.path();
        self.remote_accept_types = offered.accept_types();
        self.remote_accept_wrapped_types = offered.accept_wrapped_types();
        self.file_offer = file.clone();
        self.file_accepted = false;
        if self.state != SessionState::Established {
            self.enter_established(ctx);
        }

        Ok(Answer {
            sdp: self.describe(answer_media),
            file,
        })
    }

    /// Allow the offered file's chunks to be received.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidState` if no file was offered.
    pub fn accept_file_transfer(&mut self) -> Result<(), SessionError> {
        if self.file_offer.is_none() {
            return Err(SessionError::InvalidState("no file transfer offered"));
        }
        self.file_accepted = true;
        tracing::info!(session = %self.id, "file transfer accepted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outgoing messages
    // ------------------------------------------------------------------

    /// Queue a message for sending
    pub(crate) fn send(
        &mut self,
        source: Box<dyn PayloadSource>,
        content_type: &str,
        headers: Vec<Header>,
        ctx: &mut Context<'_>,
    ) -> Result<String, SessionError> {
        self.require_state(&[SessionState::Established], "send_message")?;
        if !self.remote_accept_types.is_empty() && !accepts_media_type(&self.remote_accept_types, content_type) {
            return Err(SessionError::Negotiation(format!("peer does not accept {content_type}")));
        }
        let message_id = msrp_crypto::random::message_id();
        let mut sender = ChunkSender::new(
            message_id.clone(),
            source,
            content_type,
            ctx.config.chunk_size,
            ctx.config.report_timeout,
        );
        for header in headers {
            sender = sender.with_header(header);
        }
        tracing::debug!(session = %self.id, message_id = %message_id, size = sender.size(), "message queued");
        self.senders.insert(message_id.clone(), sender);
        ctx.activate.push(message_id.clone());
        Ok(message_id)
    }

    /// Abort an outgoing message
    pub(crate) fn abort_send(&mut self, message_id: &str, ctx: &mut Context<'_>) -> Result<(), SessionError> {
        let sender = self
            .senders
            .get_mut(message_id)
            .ok_or_else(|| SessionError::UnknownMessage(message_id.to_string()))?;
        let was_send_complete = sender.is_send_complete();
        sender.abort(ctx.now);
        tracing::debug!(session = %self.id, message_id, "send aborted locally");
        if !was_send_complete {
            ctx.activate.push(message_id.to_string());
        }
        Ok(())
    }

    /// Abort an incoming message; its next chunk is refused with 413
    pub(crate) fn abort_receive(&mut self, message_id: &str) -> Result<(), SessionError> {
        let receiver = self
            .receivers
            .get_mut(message_id)
            .ok_or_else(|| SessionError::UnknownMessage(message_id.to_string()))?;
        receiver.abort();
        tracing::debug!(session = %self.id, message_id, "receive aborted locally");
        Ok(())
    }

    fn chunk_request(&self, chunk: Chunk) -> Request {
        let mut request = Request::new(Method::Send, self.to_path(), self.local_path());
        request.headers.push(Header::MessageId(chunk.message_id));
        if chunk.report {
            request.headers.push(Header::SuccessReport(true));
            request.headers.push(Header::FailureReport(FailureReport::Yes));
        }
        for header in chunk.headers {
            request.headers.push(header);
        }
        request.byte_range = Some(chunk.range);
        request.content_type = chunk.content_type;
        request.body = chunk.body;
        request.flag = chunk.flag;
        request
    }

    /// Next chunk of `message_id`, as a SEND request
    pub(crate) fn produce_chunk(&mut self, message_id: &str, now: Instant) -> ChunkStep {
        if self.state != SessionState::Established {
            return ChunkStep::Gone;
        }
        let Some(sender) = self.senders.get_mut(message_id) else {
            return ChunkStep::Gone;
        };
        if sender.is_mutually_aborted() || sender.is_send_complete() {
            return ChunkStep::Gone;
        }

        match sender.next_chunk(now) {
            Ok(chunk) => {
                let send_complete = sender.is_send_complete();
                let progress = Progress {
                    bytes: sender.sent_bytes(),
                    total: Some(sender.size()),
                };
                let last = chunk.flag != Flag::Continued;
                let request = self.chunk_request(chunk);
                tracing::debug!(
                    session = %self.id,
                    message_id,
                    tid = %request.tid,
                    range = ?request.byte_range.map(|r| r.to_string()),
                    "sending chunk"
                );
                self.observer.on_message_sent(&self.id, message_id, progress);
                ChunkStep::Ready {
                    request,
                    last,
                    send_complete,
                }
            }
            Err(e) => {
                tracing::warn!(session = %self.id, message_id, error = %e, "payload read failed");
                self.senders.remove(message_id);
                self.observer.on_message_send_failed(
                    &self.id,
                    message_id,
                    status::INTERNAL_ERROR,
                    &e.to_string(),
                );
                ChunkStep::Gone
            }
        }
    }

    /// Response to one of this session's SEND chunks (or its synthesized timeout)
    pub(crate) fn on_send_response(
        &mut self,
        message_id: &str,
        last_chunk: bool,
        response: &Response,
        ctx: &mut Context<'_>,
    ) {
        let code = response.status;
        if status::is_success(code) {
            if !last_chunk {
                return;
            }
            let Some(sender) = self.senders.get(message_id) else {
                return;
            };
            if sender.is_aborted() && !sender.is_remote_abort() {
                self.senders.remove(message_id);
                self.observer
                    .on_message_send_failed(&self.id, message_id, code, "aborted");
            } else if !sender.report_requested() && sender.is_send_complete() {
                self.senders.remove(message_id);
                tracing::info!(session = %self.id, message_id, "message delivered");
                self.observer.on_message_delivered(&self.id, message_id);
            }
            return;
        }

        let reason = response
            .comment
            .clone()
            .unwrap_or_else(|| status::reason(code).to_string());
        tracing::warn!(session = %self.id, message_id, status = code, reason = %reason, "SEND failed");
        if let Some(mut sender) = self.senders.remove(message_id) {
            sender.abort(ctx.now);
            self.observer
                .on_message_send_failed(&self.id, message_id, code, &reason);
        }
        if code == status::SESSION_DOES_NOT_EXIST {
            self.fail(SessionState::Error, "peer reports session does not exist");
        }
    }

    // ------------------------------------------------------------------
    // Incoming requests
    // ------------------------------------------------------------------

    fn respond(&self, request: &Request, code: u16, ctx: &mut Context<'_>) {
        let policy = request.headers.failure_report();
        let wanted = if status::is_success(code) {
            policy.respond_on_success()
        } else {
            policy.respond_on_failure()
        };
        if !wanted {
            tracing::debug!(session = %self.id, tid = %request.tid, status = code, "response suppressed by Failure-Report");
            return;
        }
        let mut response = request.response(code);
        response.from_path = self.local_path();
        ctx.out.push(Outgoing::Response(response));
    }

    fn send_success_report(&self, request: &Request, message_id: &str, total: u64, ctx: &mut Context<'_>) {
        if request.headers.success_report() != Some(true) {
            return;
        }
        let mut report = Request::new(Method::Report, request.from_path.clone(), self.local_path());
        report.headers.push(Header::MessageId(message_id.to_string()));
        report.byte_range = Some(ByteRange::new(1, total, total));
        report.headers.push(Header::Status(ReportStatus::new(status::OK)));
        tracing::debug!(session = %self.id, message_id, total, "sending success REPORT");
        ctx.out.push(Outgoing::Request { request: report, kind: None });
    }

    fn outcome_status(&self, outcome: &Outcome, message_id: &str) -> u16 {
        match outcome {
            Outcome::Accepted => status::OK,
            Outcome::Rejected(reason) => {
                tracing::debug!(session = %self.id, message_id, reason = %reason, "consumer rejected message");
                status::UNSUPPORTED_MEDIA_TYPE
            }
            Outcome::Failed(reason) => {
                tracing::warn!(session = %self.id, message_id, reason = %reason, "consumer failed to handle message");
                status::INTERNAL_ERROR
            }
        }
    }

    /// SEND or REPORT addressed to this session
    pub(crate) fn handle_request(&mut self, request: Request, ctx: &mut Context<'_>) {
        if self.state.is_terminal() {
            tracing::debug!(session = %self.id, state = %self.state, tid = %request.tid, "request for ended session");
            if request.method != Method::Report {
                self.respond(&request, status::SESSION_DOES_NOT_EXIST, ctx);
            }
            return;
        }
        match request.method {
            Method::Send => self.handle_send(request, ctx),
            Method::Report => self.handle_report(&request, ctx),
            _ => self.respond(&request, status::NOT_IMPLEMENTED, ctx),
        }
    }

    fn handle_send(&mut self, mut request: Request, ctx: &mut Context<'_>) {
        if self.file_offer.is_some() && !self.file_accepted {
            tracing::warn!(session = %self.id, "SEND before file transfer was accepted");
            self.respond(&request, status::FORBIDDEN, ctx);
            return;
        }
        let Some(message_id) = request.message_id().map(String::from) else {
            self.respond(&request, status::BAD_REQUEST, ctx);
            return;
        };
        let body = request.body.take().unwrap_or_default();
        let len = body.len() as u64;
        let range = request.byte_range.unwrap_or(ByteRange::new(1, len, len));
        if request.flag != Flag::Abort && range.last_byte(len).is_none() {
            tracing::warn!(session = %self.id, message_id = %message_id, %range, len, "body does not fit Byte-Range");
            self.respond(&request, status::BAD_REQUEST, ctx);
            return;
        }

        if self.receivers.contains_key(&message_id) {
            self.continue_receive(&request, &message_id, range, body, ctx);
        } else if request.flag == Flag::Abort {
            tracing::debug!(session = %self.id, message_id = %message_id, "abort for unknown message");
            self.respond(&request, status::OK, ctx);
        } else if range.start == 1 && request.flag == Flag::End {
            self.receive_whole(&request, message_id, body, ctx);
        } else if range.start == 1 {
            self.receive_first_chunk(&request, message_id, range, &body, ctx);
        } else {
            tracing::debug!(session = %self.id, message_id = %message_id, start = range.start, "chunk for unknown message");
            self.respond(&request, status::STOP_SENDING, ctx);
        }
    }

    fn content_type_accepted(&self, request: &Request, ctx: &Context<'_>) -> bool {
        request
            .content_type
            .as_deref()
            .is_none_or(|ct| accepts_media_type(&ctx.config.accept_types, ct))
    }

    fn receive_whole(&mut self, request: &Request, message_id: String, body: Vec<u8>, ctx: &mut Context<'_>) {
        if body.is_empty() {
            tracing::debug!(session = %self.id, message_id = %message_id, "empty SEND");
            self.respond(request, status::OK, ctx);
            return;
        }
        if !self.content_type_accepted(request, ctx) {
            self.respond(request, status::UNSUPPORTED_MEDIA_TYPE, ctx);
            return;
        }
        let total = body.len() as u64;
        let message = IncomingMessage {
            message_id: message_id.clone(),
            content_type: request.content_type.clone(),
            disposition: request.headers.content_disposition(),
            body,
        };
        tracing::info!(session = %self.id, message_id = %message_id, bytes = total, "message received");
        let outcome = self.observer.on_message_received(&self.id, message);
        let code = self.outcome_status(&outcome, &message_id);
        self.respond(request, code, ctx);
        if code == status::OK {
            self.send_success_report(request, &message_id, total, ctx);
        }
    }

    fn receive_first_chunk(
        &mut self,
        request: &Request,
        message_id: String,
        range: ByteRange,
        body: &[u8],
        ctx: &mut Context<'_>,
    ) {
        if !self.content_type_accepted(request, ctx) {
            self.respond(request, status::UNSUPPORTED_MEDIA_TYPE, ctx);
            return;
        }
        let disposition = request.headers.content_disposition();
        let first = FirstChunk {
            message_id: message_id.clone(),
            content_type: request.content_type.clone(),
            disposition: disposition.clone(),
            total_bytes: range.total,
            is_file: self.file_offer.is_some(),
        };
        let outcome = self.observer.on_first_chunk(&self.id, &first);
        let code = self.outcome_status(&outcome, &message_id);
        if code != status::OK {
            self.respond(request, code, ctx);
            return;
        }

        let mut receiver = ChunkReceiver::new(
            message_id.clone(),
            request.content_type.clone(),
            range.total,
            ctx.config.recv_buffer,
            ctx.now,
        )
        .with_disposition(disposition)
        .with_pending_limit(ctx.config.max_pending_bytes);
        if !receiver.process_chunk(&message_id, range, request.flag, body, ctx.now) {
            self.respond(request, status::STOP_SENDING, ctx);
            return;
        }
        let progress = Progress {
            bytes: receiver.contiguous_bytes(),
            total: receiver.total_bytes(),
        };
        tracing::debug!(session = %self.id, message_id = %message_id, total = ?range.total, "receiving chunked message");
        self.receivers.insert(message_id.clone(), receiver);
        if self.next_sweep.is_none() {
            self.next_sweep = Some(ctx.now + RECEIVER_SWEEP_INTERVAL);
        }
        self.observer.on_chunk_received(&self.id, &message_id, progress);
        self.respond(request, status::OK, ctx);
    }

    fn continue_receive(
        &mut self,
        request: &Request,
        message_id: &str,
        range: ByteRange,
        body: Vec<u8>,
        ctx: &mut Context<'_>,
    ) {
        let Some(receiver) = self.receivers.get_mut(message_id) else {
            return;
        };
        if !receiver.process_chunk(message_id, range, request.flag, &body, ctx.now) {
            let remote = receiver.is_remote_abort();
            self.receivers.remove(message_id);
            if remote {
                tracing::info!(session = %self.id, message_id, "peer aborted incoming message");
                self.observer.on_receive_aborted(&self.id, message_id);
                self.respond(request, status::OK, ctx);
            } else {
                self.respond(request, status::STOP_SENDING, ctx);
            }
            return;
        }

        let progress = Progress {
            bytes: receiver.contiguous_bytes(),
            total: receiver.total_bytes(),
        };
        let complete = receiver.is_complete();
        self.observer.on_chunk_received(&self.id, message_id, progress);
        if !complete {
            self.respond(request, status::OK, ctx);
            return;
        }

        let Some(receiver) = self.receivers.remove(message_id) else {
            return;
        };
        let content_type = receiver.content_type().map(String::from);
        let disposition = receiver.disposition().map(String::from);
        let body = receiver.into_payload();
        let total = body.len() as u64;
        tracing::info!(session = %self.id, message_id, bytes = total, "chunked message received");
        let message = IncomingMessage {
            message_id: message_id.to_string(),
            content_type,
            disposition,
            body,
        };
        let outcome = self.observer.on_message_received(&self.id, message);
        let code = self.outcome_status(&outcome, message_id);
        self.respond(request, code, ctx);
        if code == status::OK {
            self.send_success_report(request, message_id, total, ctx);
        }
    }

    fn handle_report(&mut self, request: &Request, ctx: &mut Context<'_>) {
        let (Some(message_id), Some(report_status), Some(range)) =
            (request.message_id(), request.headers.status(), request.byte_range)
        else {
            tracing::warn!(session = %self.id, tid = %request.tid, "malformed REPORT ignored");
            return;
        };
        let Some(sender) = self.senders.get_mut(message_id) else {
            tracing::debug!(session = %self.id, message_id, "REPORT for unknown message");
            return;
        };

        match sender.process_report(message_id, range, &report_status) {
            ReportOutcome::Ignored => {}
            ReportOutcome::Progress => {
                if sender.is_complete() && !sender.is_aborted() {
                    self.senders.remove(message_id);
                    tracing::info!(session = %self.id, message_id, "message delivered");
                    self.observer.on_message_delivered(&self.id, message_id);
                }
            }
            ReportOutcome::Resumed => {
                tracing::debug!(session = %self.id, message_id, acked = sender.acked_bytes(), "too many gaps, resending");
                ctx.activate.push(message_id.to_string());
            }
            ReportOutcome::Failed(code) => {
                self.senders.remove(message_id);
                let reason = report_status
                    .comment
                    .unwrap_or_else(|| status::reason(code).to_string());
                tracing::warn!(session = %self.id, message_id, status = code, "peer reported delivery failure");
                self.observer
                    .on_message_send_failed(&self.id, message_id, code, &reason);
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Poll re-authentication, report timeouts and the receiver sweep
    pub(crate) fn tick(&mut self, ctx: &mut Context<'_>) {
        let now = ctx.now;
        if self.state.is_terminal() {
            return;
        }

        if self.reauth_at.is_some_and(|at| at <= now) && self.auth == AuthPhase::Idle {
            self.reauth_at = None;
            tracing::info!(session = %self.id, "re-authenticating with relay");
            self.start_auth(ctx);
        }

        let expired: Vec<String> = self
            .senders
            .iter()
            .filter(|(_, s)| s.report_timed_out(now))
            .map(|(id, _)| id.clone())
            .collect();
        for message_id in expired {
            if let Some(sender) = self.senders.remove(&message_id) {
                let reason = if sender.is_aborted() { "aborted" } else { "report timeout" };
                tracing::warn!(session = %self.id, message_id = %message_id, reason, "send failed");
                self.observer
                    .on_message_send_failed(&self.id, &message_id, status::REQUEST_TIMEOUT, reason);
            }
        }

        if self.next_sweep.is_some_and(|at| at <= now) {
            let timeout = ctx.config.chunk_timeout;
            let stale: Vec<String> = self
                .receivers
                .iter()
                .filter(|(_, r)| r.is_aborted() || r.timed_out(now, timeout))
                .map(|(id, _)| id.clone())
                .collect();
            for message_id in stale {
                if let Some(receiver) = self.receivers.remove(&message_id) {
                    if !receiver.is_aborted() {
                        tracing::warn!(session = %self.id, message_id = %message_id, "incoming message timed out");
                        self.observer.on_receive_timeout(&self.id, &message_id);
                    }
                }
            }
            self.next_sweep = (!self.receivers.is_empty()).then(|| now + RECEIVER_SWEEP_INTERVAL);
        }
    }

    /// Earliest instant `tick` has work to do
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.senders
            .values()
            .filter_map(ChunkSender::report_deadline)
            .chain(self.reauth_at)
            .chain(self.next_sweep)
            .min()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("local_uri", &self.local_uri.to_string())
            .field("relay_path", &self.relay_path)
            .field("far_path", &self.far_path)
            .field("senders", &self.senders.len())
            .field("receivers", &self.receivers.len())
            .finish_non_exhaustive()
    }
}
