use thiserror::Error;

use sage_crypto::CryptoError;
use sage_did::{DidError, RegistryError};
use sage_session::SessionError;
use sage_wire::WireError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation not legal in state {0}")]
    BadState(&'static str),

    #[error("Acknowledgement mismatch: {0}")]
    AckMismatch(String),

    #[error("Peer answered {status}: {detail}")]
    Peer { status: u16, detail: String },

    #[error(transparent)]
    Identity(#[from] DidError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
