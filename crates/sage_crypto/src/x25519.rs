//! X25519 KEM keys.
//!
//! The agent's long-lived KEM key is the recipient side of the HPKE
//! handshake: peers encapsulate to it, the agent decapsulates. The
//! secret half is zeroized on drop; Diffie-Hellman outputs never leave
//! the crate (`hpke` consumes them internally).

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;
use crate::keys::{KeyKind, KeyPair, PublicKeyBytes};

#[derive(ZeroizeOnDrop)]
pub struct KemKeyPair {
    #[zeroize(skip)]
    public: PublicKeyBytes,
    secret_bytes: [u8; 32],
}

impl KeyPair for KemKeyPair {
    const KIND: KeyKind = KeyKind::X25519;

    fn generate() -> Result<Self, CryptoError> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Ok(Self {
            public: PublicKeyBytes(public.as_bytes().to_vec()),
            secret_bytes: secret.to_bytes(),
        })
    }

    fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("X25519 secret must be 32 bytes, got {}", bytes.len()))
        })?;
        let secret = StaticSecret::from(arr);
        let public = X25519Public::from(&secret);
        Ok(Self {
            public: PublicKeyBytes(public.as_bytes().to_vec()),
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

impl KemKeyPair {
    pub(crate) fn static_secret(&self) -> StaticSecret {
        StaticSecret::from(self.secret_bytes)
    }

    pub fn public_b64(&self) -> String {
        self.public.to_b64()
    }
}
