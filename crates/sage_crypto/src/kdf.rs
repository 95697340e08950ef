//! HKDF helpers + session key derivation.
//!
//! From the HPKE exporter secret both sides derive, deterministically
//! and symmetrically:
//!   session_id = SHA256(exporter || "sage/hpke v1")[..16]
//!   key_id     = HKDF-Expand(exporter, "sage/session/key-id", 16)
//!   k_init     = HKDF-Expand(exporter, "sage/session/send", 32)
//!   k_resp     = HKDF-Expand(exporter, "sage/session/recv", 32)
//!
//! The initiator sends with k_init and receives with k_resp; the
//! responder swaps them. key_id is the only value that ever appears on
//! the wire — it references the session from RFC 9421 signatures.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::hash::sha256;

const SESSION_ID_LABEL: &[u8] = b"sage/hpke v1";
const KEY_ID_LABEL: &[u8] = b"sage/session/key-id";
const SEND_LABEL: &[u8] = b"sage/session/send";
const RECV_LABEL: &[u8] = b"sage/session/recv";

/// Which side of the handshake this endpoint played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Everything a session needs, minted from one exporter secret.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeys {
    #[zeroize(skip)]
    pub session_id: [u8; 16],
    #[zeroize(skip)]
    pub key_id: [u8; 16],
    pub send_key: [u8; 32],
    pub recv_key: [u8; 32],
}

pub fn derive_session_keys(exporter: &[u8], role: Role) -> Result<SessionKeys, CryptoError> {
    if exporter.is_empty() {
        return Err(CryptoError::KeyDerivation("empty exporter secret".into()));
    }

    let mut seed = Vec::with_capacity(exporter.len() + SESSION_ID_LABEL.len());
    seed.extend_from_slice(exporter);
    seed.extend_from_slice(SESSION_ID_LABEL);
    let sid = sha256(&seed);
    seed.zeroize();

    let mut session_id = [0u8; 16];
    session_id.copy_from_slice(&sid[..16]);

    let mut key_id = [0u8; 16];
    hkdf_expand(exporter, None, KEY_ID_LABEL, &mut key_id)?;

    let mut k_init = [0u8; 32];
    let mut k_resp = [0u8; 32];
    hkdf_expand(exporter, None, SEND_LABEL, &mut k_init)?;
    hkdf_expand(exporter, None, RECV_LABEL, &mut k_resp)?;

    let (send_key, recv_key) = match role {
        Role::Initiator => (k_init, k_resp),
        Role::Responder => (k_resp, k_init),
    };

    Ok(SessionKeys {
        session_id,
        key_id,
        send_key,
        recv_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_roles_derive_mirrored_keys() {
        let exporter = [0x42u8; 32];
        let a = derive_session_keys(&exporter, Role::Initiator).unwrap();
        let b = derive_session_keys(&exporter, Role::Responder).unwrap();
        assert_eq!(a.session_id, b.session_id);
        assert_eq!(a.key_id, b.key_id);
        assert_eq!(a.send_key, b.recv_key);
        assert_eq!(a.recv_key, b.send_key);
        assert_ne!(a.send_key, a.recv_key);
    }

    #[test]
    fn key_id_distinct_from_session_id() {
        let keys = derive_session_keys(&[7u8; 32], Role::Initiator).unwrap();
        assert_ne!(keys.session_id, keys.key_id);
    }

    #[test]
    fn different_exporters_different_sessions() {
        let a = derive_session_keys(&[1u8; 32], Role::Initiator).unwrap();
        let b = derive_session_keys(&[2u8; 32], Role::Initiator).unwrap();
        assert_ne!(a.session_id, b.session_id);
    }
}
