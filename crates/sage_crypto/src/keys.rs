//! Key families and the rules common to all of them.
//!
//! Three algorithm families exist in SAGE:
//!   - ECDSA secp256k1 — chain ownership (address derivation, challenges)
//!   - Ed25519         — message and envelope signatures
//!   - X25519          — KEM half of the HPKE handshake
//!
//! Import rules (NON-NEGOTIABLE):
//!   - length must match the family exactly (ECDSA 33 or 65, others 32)
//!   - all-zero key bodies are rejected after stripping format prefixes

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

// ── Key kinds ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    EcdsaSecp256k1,
    Ed25519,
    X25519,
}

impl KeyKind {
    /// Contract-level discriminant (uint8 on the wire).
    pub fn as_u8(self) -> u8 {
        match self {
            KeyKind::EcdsaSecp256k1 => 0,
            KeyKind::Ed25519 => 1,
            KeyKind::X25519 => 2,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, CryptoError> {
        match v {
            0 => Ok(KeyKind::EcdsaSecp256k1),
            1 => Ok(KeyKind::Ed25519),
            2 => Ok(KeyKind::X25519),
            other => Err(CryptoError::InvalidKey(format!("unknown key type {other}"))),
        }
    }

    /// Validate a public key body for this family.
    pub fn validate(self, bytes: &[u8]) -> Result<(), CryptoError> {
        let body = match self {
            KeyKind::EcdsaSecp256k1 => match bytes.len() {
                // compressed: parity prefix, uncompressed: 0x04 prefix
                33 | 65 => &bytes[1..],
                n => {
                    return Err(CryptoError::InvalidKey(format!(
                        "ECDSA key must be 33 or 65 bytes, got {n}"
                    )))
                }
            },
            KeyKind::Ed25519 | KeyKind::X25519 => {
                if bytes.len() != 32 {
                    return Err(CryptoError::InvalidKey(format!(
                        "{self:?} key must be 32 bytes, got {}",
                        bytes.len()
                    )));
                }
                bytes
            }
        };
        if body.iter().all(|&b| b == 0) {
            return Err(CryptoError::InvalidKey("all-zero key".into()));
        }
        Ok(())
    }
}

// ── Public key bytes ─────────────────────────────────────────────────────────

/// Raw public key bytes, base64url-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub Vec<u8>);

impl PublicKeyBytes {
    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        Ok(Self(URL_SAFE_NO_PAD.decode(s)?))
    }

    pub fn as_array_32(&self) -> Result<[u8; 32], CryptoError> {
        self.0
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", self.0.len())))
    }
}

// ── Family traits ────────────────────────────────────────────────────────────

/// Common surface of every keypair: generation, byte import/export,
/// public half access. The secret half never leaves as anything but a
/// borrowed 32-byte slice.
pub trait KeyPair: Sized {
    const KIND: KeyKind;

    fn generate() -> Result<Self, CryptoError>;
    fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError>;
    fn secret_bytes(&self) -> &[u8; 32];
    fn public(&self) -> &PublicKeyBytes;
}

/// Signing families (Ed25519, ECDSA).
pub trait SigningPair: KeyPair {
    /// Sign `msg`; returns the family's raw signature encoding.
    /// Ed25519 signs arbitrary bytes; ECDSA requires a 32-byte digest.
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify a signature made by any public key of this family.
    fn verify(public: &[u8], msg: &[u8], sig: &[u8]) -> Result<(), CryptoError>;
}
