//! # MSRP Crypto
//!
//! Authentication primitives for the MSRP relay handshake.
//!
//! This crate provides:
//! - HTTP digest challenge parsing (`WWW-Authenticate`)
//! - Digest response computation and `Authorization` rendering
//! - Random protocol tokens (transaction ids, message ids, session ids)
//!
//! ## Algorithms
//!
//! | Function | Algorithm | Source |
//! |----------|-----------|--------|
//! | Digest | MD5, MD5-sess | RFC 2617, RFC 4976 §5 |
//! | Tokens | Alphanumeric from thread RNG | RFC 4975 §7.1 |
//! | Client nonce | OS CSPRNG, hex encoded | RFC 2617 §3.2.2 |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod digest;
pub mod error;
pub mod random;

pub use digest::{Algorithm, Credentials, DigestChallenge, DigestResponse};
pub use error::CryptoError;

/// Default length of generated transaction identifiers
pub const TRANSACTION_ID_LEN: usize = 10;

/// Default length of generated message identifiers
pub const MESSAGE_ID_LEN: usize = 12;

/// Default length of generated session identifiers
pub const SESSION_ID_LEN: usize = 16;
