//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::uri::MsrpUri;

/// Configuration validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `chunk_size` is zero
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,

    /// `max_outstanding_sends` is zero
    #[error("max_outstanding_sends must be greater than zero")]
    ZeroWindow,

    /// A timeout is zero
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    /// Password configured without a username
    #[error("password configured without username")]
    PasswordWithoutUsername,

    /// Relay URI does not parse
    #[error("invalid relay URI: {0}")]
    InvalidRelay(String),

    /// Transport name is empty or contains separators
    #[error("invalid transport name: {0:?}")]
    InvalidTransport(String),
}

/// Configuration shared by every session on a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum body bytes per SEND chunk
    pub chunk_size: usize,

    /// Cap on in-flight SEND requests per connection
    pub max_outstanding_sends: usize,

    /// Bytes buffered by a receiver before flushing to its sink
    pub recv_buffer: usize,

    /// Bytes a receiver holds for chunks that arrived ahead of a gap
    pub max_pending_bytes: usize,

    /// Receiver inactivity timeout
    #[serde(with = "duration_ms")]
    pub chunk_timeout: Duration,

    /// Time a sender waits for its final REPORT
    #[serde(with = "duration_ms")]
    pub report_timeout: Duration,

    /// Time a request waits for its response
    #[serde(with = "duration_ms")]
    pub transaction_timeout: Duration,

    /// Relay to authenticate against (`msrps://relay.example.com;tcp`)
    pub relay: Option<String>,

    /// Relay username
    pub username: Option<String>,

    /// Relay password
    pub password: Option<String>,

    /// Method name used in the digest computation
    pub digest_method: String,

    /// Requested registration lifetime in seconds
    pub auth_expires: Option<u32>,

    /// Media types accepted in SEND bodies (`*` and `type/*` allowed)
    pub accept_types: Vec<String>,

    /// Media types accepted inside wrappers such as `message/cpim`
    pub accept_wrapped_types: Vec<String>,

    /// Generate `msrps` local URIs
    pub secure: bool,

    /// Transport parameter of local URIs
    pub transport: String,

    /// Host part of local URIs; a random `.invalid` name when unset
    pub authority: Option<String>,

    /// Port of local URIs
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 2048,
            max_outstanding_sends: 32,
            recv_buffer: 1024 * 1024,
            max_pending_bytes: crate::transfer::receiver::DEFAULT_PENDING_LIMIT,
            chunk_timeout: Duration::from_secs(30),
            report_timeout: Duration::from_secs(120),
            transaction_timeout: Duration::from_secs(30),
            relay: None,
            username: None,
            password: None,
            digest_method: "AUTH".to_string(),
            auth_expires: None,
            accept_types: vec!["*".to_string()],
            accept_wrapped_types: Vec::new(),
            secure: false,
            transport: "tcp".to_string(),
            authority: None,
            port: crate::uri::DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Check option consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.max_outstanding_sends == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        for (name, value) in [
            ("chunk_timeout", self.chunk_timeout),
            ("report_timeout", self.report_timeout),
            ("transaction_timeout", self.transaction_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::PasswordWithoutUsername);
        }
        if self.transport.is_empty() || self.transport.contains([';', '/', ' ']) {
            return Err(ConfigError::InvalidTransport(self.transport.clone()));
        }
        self.relay_uri()?;
        Ok(())
    }

    /// Parsed relay URI, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRelay`] if the configured relay does not parse.
    pub fn relay_uri(&self) -> Result<Option<MsrpUri>, ConfigError> {
        self.relay
            .as_deref()
            .map(|r| MsrpUri::parse(r).map_err(|e| ConfigError::InvalidRelay(e.to_string())))
            .transpose()
    }
}

/// Serialize a [`Duration`] as whole milliseconds
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as `u64` milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize from `u64` milliseconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
