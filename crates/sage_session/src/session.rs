//! Per-session AEAD state and lifecycle.
//!
//! State machine:
//!   Pending → Established → {IdleExpired, TtlExpired, Closed}
//!
//! Invariants (NON-NEGOTIABLE):
//!   - nonce counters are strictly monotonic per direction; a
//!     (key id, nonce) pair is never reused
//!   - within one direction, messages decrypt in counter order only
//!   - a terminal session performs no cryptographic operation
//!   - key material is zeroized on drop

use std::time::Instant;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use sage_crypto::aead::{self, counter_nonce, nonce_counter, NONCE_LEN};
use sage_crypto::kdf::{derive_session_keys, Role};
use sage_crypto::keys::PublicKeyBytes;

use crate::error::SessionError;
use crate::policy::SessionPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Minted locally, peer acknowledgement outstanding.
    Pending,
    Established,
    IdleExpired,
    TtlExpired,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::IdleExpired | SessionState::TtlExpired | SessionState::Closed
        )
    }
}

/// One encrypted frame. `nonce` doubles as the ordering token.
#[derive(Debug, Clone)]
pub struct EncryptedPacket {
    pub key_id: [u8; 16],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

#[derive(ZeroizeOnDrop)]
pub struct SecureSession {
    #[zeroize(skip)]
    session_id: [u8; 16],
    #[zeroize(skip)]
    key_id: [u8; 16],
    send_key: [u8; 32],
    recv_key: [u8; 32],
    #[zeroize(skip)]
    send_ctr: u128,
    #[zeroize(skip)]
    recv_ctr: u128,
    #[zeroize(skip)]
    created: Instant,
    #[zeroize(skip)]
    created_at: DateTime<Utc>,
    #[zeroize(skip)]
    last_used: Instant,
    #[zeroize(skip)]
    messages_sent: u64,
    #[zeroize(skip)]
    messages_received: u64,
    #[zeroize(skip)]
    local_did: String,
    #[zeroize(skip)]
    peer_did: String,
    /// Peer's static Ed25519 key, captured at resolution time; the
    /// signature layer verifies against it without re-resolving.
    #[zeroize(skip)]
    peer_signing_key: PublicKeyBytes,
    #[zeroize(skip)]
    state: SessionState,
    #[zeroize(skip)]
    policy: SessionPolicy,
}

impl SecureSession {
    /// Mint a session from the HPKE exporter secret. Starts `Pending`;
    /// call `establish` once the peer's acknowledgement (or invite) has
    /// been verified.
    pub fn from_exporter(
        exporter: &[u8],
        role: Role,
        local_did: impl Into<String>,
        peer_did: impl Into<String>,
        peer_signing_key: PublicKeyBytes,
        policy: SessionPolicy,
    ) -> Result<Self, SessionError> {
        let keys = derive_session_keys(exporter, role)?;
        let now = Instant::now();
        Ok(Self {
            session_id: keys.session_id,
            key_id: keys.key_id,
            send_key: keys.send_key,
            recv_key: keys.recv_key,
            send_ctr: 0,
            recv_ctr: 0,
            created: now,
            created_at: Utc::now(),
            last_used: now,
            messages_sent: 0,
            messages_received: 0,
            local_did: local_did.into(),
            peer_did: peer_did.into(),
            peer_signing_key,
            state: SessionState::Pending,
            policy,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn session_id(&self) -> [u8; 16] {
        self.session_id
    }

    pub fn key_id(&self) -> [u8; 16] {
        self.key_id
    }

    pub fn key_id_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.key_id)
    }

    pub fn local_did(&self) -> &str {
        &self.local_did
    }

    pub fn peer_did(&self) -> &str {
        &self.peer_did
    }

    pub fn peer_signing_key(&self) -> &PublicKeyBytes {
        &self.peer_signing_key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn establish(&mut self) -> Result<(), SessionError> {
        self.check_policies()?;
        self.state = SessionState::Established;
        Ok(())
    }

    /// Idempotent; a closed session stays closed.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Inline policy check. Transitions to the matching terminal state
    /// and reports `Expired` — identically for every policy.
    pub fn check_policies(&mut self) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::Expired);
        }
        if self.created.elapsed() >= self.policy.max_age {
            self.state = SessionState::TtlExpired;
            return Err(SessionError::Expired);
        }
        if self.last_used.elapsed() >= self.policy.idle_timeout {
            self.state = SessionState::IdleExpired;
            return Err(SessionError::Expired);
        }
        Ok(())
    }

    fn ensure_established(&mut self) -> Result<(), SessionError> {
        self.check_policies()?;
        if self.state != SessionState::Established {
            return Err(SessionError::NotEstablished);
        }
        Ok(())
    }

    // ── Cryptographic operations ─────────────────────────────────────

    /// Encrypt one frame in the send direction. Consumes exactly one
    /// nonce; refuses on counter wrap and on any policy breach.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<EncryptedPacket, SessionError> {
        self.ensure_established()?;
        if self.messages_sent >= self.policy.max_messages {
            self.state = SessionState::Closed;
            return Err(SessionError::Expired);
        }

        let nonce = counter_nonce(self.send_ctr)?;
        let aad = frame_aad(&self.key_id, &nonce);
        let ciphertext = aead::seal(&self.send_key, &nonce, plaintext, &aad)?;

        self.send_ctr += 1;
        self.messages_sent += 1;
        self.last_used = Instant::now();

        Ok(EncryptedPacket {
            key_id: self.key_id,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt one frame in the receive direction. The nonce must be
    /// exactly the next expected counter — strict per-direction order.
    pub fn decrypt(
        &mut self,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, SessionError> {
        self.ensure_established()?;
        if self.messages_received >= self.policy.max_messages {
            self.state = SessionState::Closed;
            return Err(SessionError::Expired);
        }

        let got = nonce_counter(nonce);
        if got != self.recv_ctr {
            return Err(SessionError::NonceOutOfOrder {
                expected: self.recv_ctr,
                got,
            });
        }

        let aad = frame_aad(&self.key_id, nonce);
        let plaintext = aead::open(&self.recv_key, nonce, ciphertext, &aad)?;

        self.recv_ctr += 1;
        self.messages_received += 1;
        self.last_used = Instant::now();
        Ok(plaintext)
    }
}

/// AAD binds the frame to its session handle and position.
fn frame_aad(key_id: &[u8; 16], nonce: &[u8; NONCE_LEN]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(16 + NONCE_LEN);
    aad.extend_from_slice(key_id);
    aad.extend_from_slice(nonce);
    aad
}
