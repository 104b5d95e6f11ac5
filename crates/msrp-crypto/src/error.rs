//! Authentication error types.

use thiserror::Error;

/// Errors raised while handling digest authentication
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Challenge does not use the Digest scheme
    #[error("unsupported authentication scheme: {0}")]
    UnsupportedScheme(String),

    /// Challenge names an algorithm other than MD5 / MD5-sess
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Challenge only offers qop values we cannot satisfy
    #[error("unsupported qop: {0}")]
    UnsupportedQop(String),

    /// A mandatory challenge parameter is missing
    #[error("challenge is missing parameter: {0}")]
    MissingParameter(&'static str),

    /// Challenge could not be tokenized
    #[error("malformed challenge: {0}")]
    MalformedChallenge(String),

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,
}
