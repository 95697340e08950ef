use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("AEAD encryption failed")]
    AeadSeal,

    #[error("AEAD decryption failed (authentication tag mismatch — possible tampering)")]
    AeadOpen,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Nonce counter exhausted")]
    NonceOverflow,

    #[error("Malformed handshake info: {0}")]
    InvalidInfo(String),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
