//! # MSRP Core
//!
//! Sans-I/O implementation of the Message Session Relay Protocol
//! (RFC 4975), relay authentication (RFC 4976) and SDP file-transfer
//! negotiation (RFC 5547).
//!
//! This crate provides:
//! - Message encoding, decoding and stream framing
//! - Chunked sending with Success-Report tracking and resumption
//! - Out-of-order chunk reassembly
//! - Relay AUTH with digest credentials
//! - SDP offer/answer for message and file sessions
//! - Fair multiplexing of senders over one connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Connection                                │
//! │   (one transport; transactions, scheduler, session routing)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Sessions                                 │
//! │   (relay auth, SDP negotiation, senders and receivers)          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          Codec                                   │
//! │   (MSRP requests/responses, end-line framing)                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The crate performs no I/O and reads no clock: the driver passes frames
//! and `Instant`s in, and receives frames through its [`Transport`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod message;
pub mod scheduler;
pub mod sdp;
pub mod session;
pub mod transaction;
pub mod transfer;
pub mod transport;
pub mod uri;

pub use codec::{StreamFramer, decode, encode};
pub use config::Config;
pub use connection::Connection;
pub use error::{Error, ParseError, Result, SessionError};
pub use events::{FirstChunk, IncomingMessage, NullObserver, Outcome, Progress, SessionObserver};
pub use message::{ByteRange, FailureReport, Flag, Header, Headers, Message, Method, ReportStatus, Request, Response};
pub use sdp::{Direction, FileSelector, FileTransfer, SessionDescription};
pub use session::{Answer, Session, SessionId, SessionState};
pub use transfer::{ChunkReceiver, ChunkSender, FileSource, PayloadSource};
pub use transport::{MemoryTransport, Transport, TransportError};
pub use uri::MsrpUri;

/// Default MSRP port
pub const DEFAULT_PORT: u16 = uri::DEFAULT_PORT;
