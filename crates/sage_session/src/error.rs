use thiserror::Error;

use sage_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Terminal state or policy breach — identical for TTL, idle,
    /// message cap and explicit close.
    #[error("Session expired")]
    Expired,

    #[error("No session for this key id")]
    NoSession,

    #[error("Session not yet established")]
    NotEstablished,

    #[error("Out-of-order nonce: expected {expected}, got {got}")]
    NonceOutOfOrder { expected: u128, got: u128 },

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
