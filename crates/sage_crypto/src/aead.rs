//! Authenticated Encryption with Associated Data.
//!
//! ChaCha20-Poly1305 (96-bit nonce). Key: 32 bytes. Tag: 16 bytes.
//!
//! Nonces are NOT random: each session direction carries a monotonic
//! 96-bit big-endian counter starting at 0, and encryption is refused
//! when the counter would wrap. The caller owns the counter; this
//! module only converts and seals.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Largest representable 96-bit counter value.
pub const MAX_NONCE_COUNTER: u128 = (1u128 << 96) - 1;

/// Convert a counter into a 96-bit big-endian nonce.
pub fn counter_nonce(counter: u128) -> Result<[u8; NONCE_LEN], CryptoError> {
    if counter > MAX_NONCE_COUNTER {
        return Err(CryptoError::NonceOverflow);
    }
    let wide = counter.to_be_bytes();
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&wide[4..]);
    Ok(nonce)
}

/// Read a 96-bit big-endian nonce back into a counter.
pub fn nonce_counter(nonce: &[u8; NONCE_LEN]) -> u128 {
    let mut wide = [0u8; 16];
    wide[4..].copy_from_slice(nonce);
    u128::from_be_bytes(wide)
}

pub fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::AeadSeal)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadSeal)
}

pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::AeadOpen)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AeadOpen)?;
    Ok(Zeroizing::new(plaintext))
}
