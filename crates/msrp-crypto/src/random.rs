//! Random protocol tokens.
//!
//! Identifiers only need to be unique and unguessable enough to avoid
//! collisions on one connection, so they come from the thread RNG. The digest
//! client nonce comes from the OS CSPRNG.

use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::CryptoError;
use crate::{MESSAGE_ID_LEN, SESSION_ID_LEN, TRANSACTION_ID_LEN};

/// Generate an alphanumeric token of `len` characters.
#[must_use]
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a transaction identifier.
#[must_use]
pub fn transaction_id() -> String {
    random_token(TRANSACTION_ID_LEN)
}

/// Generate a message identifier.
#[must_use]
pub fn message_id() -> String {
    random_token(MESSAGE_ID_LEN)
}

/// Generate a session identifier.
#[must_use]
pub fn session_id() -> String {
    random_token(SESSION_ID_LEN)
}

/// Generate a hex client nonce for digest authentication.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn client_nonce() -> Result<String, CryptoError> {
    let mut buf = [0u8; 16];
    getrandom::getrandom(&mut buf).map_err(|_| CryptoError::RandomFailed)?;
    Ok(hex::encode(buf))
}
