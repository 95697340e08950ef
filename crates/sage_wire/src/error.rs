use thiserror::Error;

use sage_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Clock skew {skew_secs}s exceeds maximum {max_secs}s")]
    SkewExceeded { skew_secs: i64, max_secs: u64 },

    #[error("Replayed request")]
    Replay,

    #[error("No session for this key id")]
    NoSession,

    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
