//! Keccak-256 and SHA-256 utilities.
//!
//! Keccak is the hash of the ledger domain (key hashes, commit hashes,
//! address derivation, registration challenges). SHA-256 is the hash of
//! the session domain (HPKE KDF, session ids, content digests).

use sha2::{Digest as _, Sha256};
use sha3::{Digest as _, Keccak256};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Wrap a 32-byte digest in the Ethereum personal-sign envelope and
/// hash the result: keccak256("\x19Ethereum Signed Message:\n32" || digest).
pub fn eth_signed_digest(digest: &[u8; 32]) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(28 + 32);
    preimage.extend_from_slice(b"\x19Ethereum Signed Message:\n32");
    preimage.extend_from_slice(digest);
    keccak256(&preimage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_empty_vector() {
        // Well-known keccak256("") value
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn keccak_hello_vector() {
        assert_eq!(
            hex::encode(keccak256(b"hello")),
            "1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
        );
    }

    #[test]
    fn sha256_empty_vector() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn personal_sign_envelope_changes_digest() {
        let d = keccak256(b"challenge");
        assert_ne!(eth_signed_digest(&d), d);
    }
}
