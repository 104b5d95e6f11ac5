//! Drives a sans-I/O [`Connection`] over a TCP stream.
//!
//! Frames the core emits go through an unbounded channel to the socket
//! writer. Bytes read from the socket are cut into frames by a
//! [`StreamFramer`]. Session notifications come back as [`Event`]s.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use msrp_core::transport::TransportStats;
use msrp_core::{
    Connection, IncomingMessage, Outcome, Progress, SessionId, SessionObserver, SessionState, StreamFramer,
    Transport, TransportError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::config::Config;

/// Transport handing frames to the socket writer through a channel
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    closed: bool,
    stats: TransportStats,
}

impl ChannelTransport {
    fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            tx,
            closed: false,
            stats: TransportStats::default(),
        }
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.closed {
            self.stats.record_send_error();
            return Err(TransportError::Closed);
        }
        let len = frame.len();
        if self.tx.send(frame).is_err() {
            self.stats.record_send_error();
            return Err(TransportError::Closed);
        }
        self.stats.record_send(len);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
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

/// Session notification forwarded to the command loop
#[derive(Debug)]
pub enum Event {
    /// Session changed state
    State(SessionState),
    /// Relay accepted our credentials
    Authenticated,
    /// Chunk handed to the socket
    Sent(Progress),
    /// Chunk stored
    Received(Progress),
    /// Delivery confirmed
    Delivered(String),
    /// Delivery failed
    SendFailed { status: u16, reason: String },
    /// Complete message
    Message(IncomingMessage),
    /// Peer aborted the incoming message
    ReceiveAborted(String),
    /// Incoming message stalled
    ReceiveTimeout(String),
}

/// Observer forwarding every notification as an [`Event`]
struct ChannelObserver {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelObserver {
    fn emit(&self, event: Event) {
        // Receiver gone means the command finished
        let _ = self.tx.send(event);
    }
}

impl SessionObserver for ChannelObserver {
    fn on_state_changed(&mut self, _session: &SessionId, state: SessionState) {
        self.emit(Event::State(state));
    }

    fn on_authenticated(&mut self, _session: &SessionId) {
        self.emit(Event::Authenticated);
    }

    fn on_chunk_received(&mut self, _session: &SessionId, _message_id: &str, progress: Progress) {
        self.emit(Event::Received(progress));
    }

    fn on_message_received(&mut self, _session: &SessionId, message: IncomingMessage) -> Outcome {
        self.emit(Event::Message(message));
        Outcome::Accepted
    }

    fn on_message_sent(&mut self, _session: &SessionId, _message_id: &str, progress: Progress) {
        self.emit(Event::Sent(progress));
    }

    fn on_message_delivered(&mut self, _session: &SessionId, message_id: &str) {
        self.emit(Event::Delivered(message_id.to_string()));
    }

    fn on_message_send_failed(&mut self, _session: &SessionId, _message_id: &str, status: u16, reason: &str) {
        self.emit(Event::SendFailed {
            status,
            reason: reason.to_string(),
        });
    }

    fn on_receive_aborted(&mut self, _session: &SessionId, message_id: &str) {
        self.emit(Event::ReceiveAborted(message_id.to_string()));
    }

    fn on_receive_timeout(&mut self, _session: &SessionId, message_id: &str) {
        self.emit(Event::ReceiveTimeout(message_id.to_string()));
    }
}

enum Wake {
    Read(std::io::Result<usize>),
    Timer,
}

/// One TCP connection running a single MSRP session
pub struct Endpoint {
    connection: Connection<ChannelTransport>,
    session: SessionId,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedReceiver<Event>,
    framer: StreamFramer,
    read_buffer: Vec<u8>,
}

impl Endpoint {
    /// Wrap a connected stream and open one session on it
    ///
    /// # Errors
    ///
    /// Returns an error if the protocol configuration is rejected.
    pub fn new(stream: TcpStream, config: &Config) -> anyhow::Result<Self> {
        let peer = stream.peer_addr().ok();
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let (frame_tx, outbound) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        let mut connection = Connection::new(ChannelTransport::new(frame_tx), config.msrp.clone())
            .context("creating MSRP connection")?;
        let now = Instant::now();
        let session = connection.create_session(Box::new(ChannelObserver { tx: event_tx }), now);
        connection.on_open(now);
        tracing::info!(session = %session, ?peer, "endpoint ready");

        Ok(Self {
            connection,
            session,
            reader,
            writer,
            outbound,
            events,
            framer: StreamFramer::new(config.network.max_frame_size),
            read_buffer: vec![0; config.network.read_buffer],
        })
    }

    /// The core connection
    pub fn connection_mut(&mut self) -> &mut Connection<ChannelTransport> {
        &mut self.connection
    }

    /// Our session
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Current session state
    pub fn state(&self) -> anyhow::Result<SessionState> {
        self.connection
            .session(&self.session)
            .map(msrp_core::Session::state)
            .context("session disappeared")
    }

    /// Write every frame the core has queued
    pub async fn flush(&mut self) -> anyhow::Result<()> {
        while let Ok(frame) = self.outbound.try_recv() {
            self.writer.write_all(&frame).await.context("writing to peer")?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Wait until the session can negotiate SDP
    pub async fn wait_negotiable(&mut self) -> anyhow::Result<()> {
        loop {
            match self.state()? {
                SessionState::AwaitSdp | SessionState::Established => return Ok(()),
                SessionState::AuthFailed => anyhow::bail!("relay rejected our credentials"),
                state if state.is_terminal() => anyhow::bail!("session ended in {state}"),
                _ => {}
            }
            if let Event::Authenticated = self.next_event().await? {
                println!("{}", console::style("Authenticated with relay").green());
            }
        }
    }

    /// Run the I/O loop until the session produces an event
    pub async fn next_event(&mut self) -> anyhow::Result<Event> {
        loop {
            while self.connection.wants_schedule() {
                if self.connection.schedule(Instant::now()) == 0 {
                    break;
                }
            }
            self.flush().await?;
            if let Ok(event) = self.events.try_recv() {
                return Ok(event);
            }

            let deadline = self.connection.next_deadline().map(tokio::time::Instant::from_std);
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            let wake = tokio::select! {
                read = self.reader.read(&mut self.read_buffer) => Wake::Read(read),
                () = timer => Wake::Timer,
            };

            match wake {
                Wake::Read(Ok(0)) => {
                    self.connection.on_close(Instant::now());
                    anyhow::bail!("peer closed the connection");
                }
                Wake::Read(Ok(n)) => {
                    self.framer.push(&self.read_buffer[..n]);
                    while let Some(frame) = self.framer.next_frame().context("malformed stream from peer")? {
                        if let Err(e) = self.connection.on_message(&frame, Instant::now()) {
                            tracing::warn!(error = %e, "dropping undecodable frame");
                        }
                    }
                }
                Wake::Read(Err(e)) => {
                    self.connection.on_error(&TransportError::Io(e), Instant::now());
                    anyhow::bail!("connection to peer failed");
                }
                Wake::Timer => self.connection.tick(Instant::now()),
            }
        }
    }

    /// Close the session and flush what is left
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        let session = self.session.clone();
        self.flush().await?;
        self.connection.close_session(&session)?;
        self.connection.transport_mut().close()?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Poll until `path` exists and holds a non-empty SDP body
pub async fn wait_for_sdp(path: &Path, config: &Config) -> anyhow::Result<String> {
    let mut announced = false;
    loop {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) if !contents.trim().is_empty() => return Ok(contents),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        }
        if !announced {
            println!("Waiting for {}", path.display());
            announced = true;
        }
        tokio::time::sleep(config.network.sdp_poll_interval).await;
    }
}
