//! Chain-owner ECDSA keys (secp256k1).
//!
//! These keys anchor an agent to its ledger identity:
//!   - the DID's chain-specific id is derived from the public key
//!     (keccak-256 of the uncompressed 64-byte body, low 20 bytes)
//!   - registration challenges are signed with the recoverable scheme so
//!     the contract can recover the signer address on-chain
//!
//! Signature wire format: 65 bytes `r || s || v`, `v ∈ {27, 28}`
//! (the personal-sign convention).

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;
use crate::hash::keccak256;
use crate::keys::{KeyKind, KeyPair, PublicKeyBytes, SigningPair};

#[derive(ZeroizeOnDrop)]
pub struct EcdsaKeyPair {
    /// Compressed SEC1 encoding (33 bytes).
    #[zeroize(skip)]
    public: PublicKeyBytes,
    secret_bytes: [u8; 32],
}

impl KeyPair for EcdsaKeyPair {
    const KIND: KeyKind = KeyKind::EcdsaSecp256k1;

    fn generate() -> Result<Self, CryptoError> {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(&mut rand::rngs::OsRng);
        let pk = PublicKey::from_secret_key(&secp, &sk);
        Ok(Self {
            public: PublicKeyBytes(pk.serialize().to_vec()),
            secret_bytes: sk.secret_bytes(),
        })
    }

    fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let sk = SecretKey::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("bad secp256k1 secret: {e}")))?;
        let secp = Secp256k1::new();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        Ok(Self {
            public: PublicKeyBytes(pk.serialize().to_vec()),
            secret_bytes: sk.secret_bytes(),
        })
    }

    fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    fn public(&self) -> &PublicKeyBytes {
        &self.public
    }
}

impl SigningPair for EcdsaKeyPair {
    /// Recoverable signature over a 32-byte digest (`msg` MUST already be
    /// a digest — this family never hashes for you).
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.sign_recoverable(msg)?.to_vec())
    }

    fn verify(public: &[u8], msg: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        let recovered = recover_public(msg, sig)?;
        let expected = PublicKey::from_slice(public)
            .map_err(|e| CryptoError::InvalidKey(format!("bad secp256k1 public: {e}")))?;
        if recovered == expected {
            Ok(())
        } else {
            Err(CryptoError::SignatureVerification)
        }
    }
}

impl EcdsaKeyPair {
    /// Sign a 32-byte digest; returns `r || s || v` (65 bytes).
    pub fn sign_recoverable(&self, digest: &[u8]) -> Result<[u8; 65], CryptoError> {
        let secp = Secp256k1::new();
        let msg = Message::from_digest_slice(digest)
            .map_err(|e| CryptoError::MalformedSignature(format!("bad digest: {e}")))?;
        let sk = SecretKey::from_slice(&self.secret_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let (rec_id, compact) = secp
            .sign_ecdsa_recoverable(&msg, &sk)
            .serialize_compact();
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&compact);
        out[64] = rec_id.to_i32() as u8 + 27;
        Ok(out)
    }

    /// Ethereum address of this key: keccak of the uncompressed body,
    /// low 20 bytes.
    pub fn address(&self) -> Result<[u8; 20], CryptoError> {
        address_from_public(&self.public.0)
    }

    /// Uncompressed SEC1 encoding (65 bytes, 0x04 prefix).
    pub fn public_uncompressed(&self) -> Result<[u8; 65], CryptoError> {
        let pk = PublicKey::from_slice(&self.public.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(pk.serialize_uncompressed())
    }
}

/// Recover the signer's public key from a 65-byte `r || s || v` signature
/// over `digest`.
pub fn recover_public(digest: &[u8], sig: &[u8]) -> Result<PublicKey, CryptoError> {
    if sig.len() != 65 {
        return Err(CryptoError::MalformedSignature(format!(
            "recoverable signature must be 65 bytes, got {}",
            sig.len()
        )));
    }
    let v = sig[64];
    let rec = v
        .checked_sub(27)
        .filter(|r| *r < 4)
        .ok_or_else(|| CryptoError::MalformedSignature(format!("bad recovery id {v}")))?;
    let rec_id = RecoveryId::from_i32(rec as i32)
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    let rec_sig = RecoverableSignature::from_compact(&sig[..64], rec_id)
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    let msg = Message::from_digest_slice(digest)
        .map_err(|e| CryptoError::MalformedSignature(format!("bad digest: {e}")))?;
    Secp256k1::new()
        .recover_ecdsa(&msg, &rec_sig)
        .map_err(|_| CryptoError::SignatureVerification)
}

/// Recover the signer's address from a recoverable signature.
pub fn recover_address(digest: &[u8], sig: &[u8]) -> Result<[u8; 20], CryptoError> {
    let pk = recover_public(digest, sig)?;
    address_from_public(&pk.serialize_uncompressed())
}

/// Derive the 20-byte chain address from a secp256k1 public key.
///
/// Compressed keys (33 bytes) are decompressed first; the 0x04 prefix of
/// the uncompressed form is stripped and keccak-256 is taken over the
/// remaining 64 bytes, keeping the low 20.
pub fn address_from_public(public: &[u8]) -> Result<[u8; 20], CryptoError> {
    KeyKind::EcdsaSecp256k1.validate(public)?;
    let pk = PublicKey::from_slice(public)
        .map_err(|e| CryptoError::InvalidKey(format!("bad secp256k1 public: {e}")))?;
    let uncompressed = pk.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..]);
    Ok(addr)
}
