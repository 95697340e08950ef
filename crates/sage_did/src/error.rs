use thiserror::Error;

use sage_crypto::CryptoError;

/// Resolution-side failures.
#[derive(Debug, Error)]
pub enum DidError {
    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("Identity inactive: {0}")]
    IdentityInactive(String),

    #[error("Record has no usable {0} key")]
    MissingKey(&'static str),

    #[error("Resolution cancelled")]
    Cancelled,

    #[error("Registry unreachable: {0}")]
    Transport(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Registry contract failures (mirrors the on-chain revert set).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Agent not found")]
    IdentityNotFound,

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("No commitment for this owner")]
    CommitmentMissing,

    #[error("Commitment expired")]
    CommitmentExpired,

    #[error("Commitment already revealed")]
    CommitmentAlreadyRevealed,

    #[error("Commitment hash mismatch")]
    CommitmentMismatch,

    #[error("Reveal too soon")]
    RevealTooSoon,

    #[error("Reveal too late")]
    RevealTooLate,

    #[error("Daily registration limit reached")]
    RateLimitExceeded,

    #[error("Stake {provided} below required {required}")]
    StakeInsufficient { required: u128, provided: u128 },

    #[error("Stake still locked")]
    StakeLocked,

    #[error("Key already bound to a different owner")]
    KeyInUse,

    #[error("Key has been revoked")]
    KeyRevoked,

    #[error("Key cap reached")]
    KeyCapReached,

    #[error("DID already registered")]
    DidAlreadyRegistered,

    #[error("Activation delay has not elapsed")]
    ActivationTooSoon,

    #[error("Caller is not owner or approved operator")]
    Unauthorized,

    #[error("Registration rejected by hook: {0}")]
    HookRejected(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Ledger unreachable: {0}")]
    Transport(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
