//! Long-term Ed25519 signing keys.
//!
//! Each agent publishes one Ed25519 public key to the registry; the
//! matching secret half signs every RFC 9421 message and handshake
//! envelope the agent emits. Drop clears the secret via ZeroizeOnDrop.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;
use crate::keys::{KeyKind, KeyPair, PublicKeyBytes, SigningPair};

#[derive(ZeroizeOnDrop)]
pub struct Ed25519KeyPair {
    #[zeroize(skip)]
    public: PublicKeyBytes,
    secret_bytes: [u8; 32],
}

impl KeyPair for Ed25519KeyPair {
    const KIND: KeyKind = KeyKind::Ed25519;

    fn generate() -> Result<Self, CryptoError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = PublicKeyBytes(signing_key.verifying_key().to_bytes().to_vec());
        Ok(Self {
            public,
            secret_bytes: signing_key.to_bytes(),
        })
    }

    fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("Ed25519 secret must be 32 bytes, got {}", bytes.len()))
        })?;
        let signing_key = SigningKey::from_bytes(&arr);
        let public = PublicKeyBytes(signing_key.verifying_key().to_bytes().to_vec());
        Ok(Self {
            public,
            secret_bytes: arr,
        })
    }

    fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    fn public(&self) -> &PublicKeyBytes {
        &self.public
    }
}

impl SigningPair for Ed25519KeyPair {
    /// Returns the 64-byte raw Ed25519 signature.
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(SigningKey::from_bytes(&self.secret_bytes)
            .sign(msg)
            .to_bytes()
            .to_vec())
    }

    fn verify(public: &[u8], msg: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
        KeyKind::Ed25519.validate(public)?;
        let vk = VerifyingKey::from_bytes(
            public
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("bad pubkey length".into()))?,
        )
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig = Signature::from_bytes(
            sig.try_into()
                .map_err(|_| CryptoError::MalformedSignature("Ed25519 signature must be 64 bytes".into()))?,
        );
        vk.verify(msg, &sig)
            .map_err(|_| CryptoError::SignatureVerification)
    }
}

impl Ed25519KeyPair {
    pub fn public_b64(&self) -> String {
        self.public.to_b64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = Ed25519KeyPair::generate().unwrap();
        let sig = kp.sign(b"covered bytes").unwrap();
        Ed25519KeyPair::verify(&kp.public().0, b"covered bytes", &sig).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let kp = Ed25519KeyPair::generate().unwrap();
        let sig = kp.sign(b"original").unwrap();
        assert!(Ed25519KeyPair::verify(&kp.public().0, b"tampered", &sig).is_err());
    }

    #[test]
    fn import_reproduces_public_half() {
        let kp = Ed25519KeyPair::generate().unwrap();
        let restored = Ed25519KeyPair::from_secret_bytes(kp.secret_bytes()).unwrap();
        assert_eq!(restored.public(), kp.public());
    }
}
