//! Handshake and application envelopes (JSON request/response bodies).
//!
//! All on-wire types are versioned. Binary fields travel base64url;
//! `sent_at` is advisory (the signature's `created` is what the skew
//! policy judges).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sage_crypto::hpke::HandshakeInfo;
use sage_session::EncryptedPacket;

use crate::error::WireError;

pub const WIRE_VERSION: u8 = 1;

pub const INVITE_PATH: &str = "/sage/invite";
pub const MESSAGE_PATH: &str = "/sage/message";

/// The initiator's opening move: HPKE encapsulation plus the sealed
/// invitation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub version: u8,
    /// Channel context bound into the HPKE info.
    pub channel: String,
    pub initiator_did: String,
    pub responder_did: String,
    /// Encapsulated KEM key (32 bytes, base64url).
    pub enc: String,
    /// HPKE-sealed invitation payload (base64url).
    pub ciphertext: String,
    /// Random id for ack correlation; no cryptographic meaning.
    pub envelope_id: String,
    pub sent_at: DateTime<Utc>,
}

impl Invitation {
    /// The HPKE info this invitation claims. Callers MUST cross-check
    /// the DIDs against the transport/identity layers.
    pub fn handshake_info(&self) -> Result<HandshakeInfo, WireError> {
        HandshakeInfo::new(
            self.channel.clone(),
            self.initiator_did.clone(),
            self.responder_did.clone(),
        )
        .map_err(WireError::Crypto)
    }

    pub fn enc_bytes(&self) -> Result<Vec<u8>, WireError> {
        decode_b64(&self.enc, "enc")
    }

    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, WireError> {
        decode_b64(&self.ciphertext, "ciphertext")
    }
}

/// The responder's signed acknowledgement. `key_id` references the
/// freshly minted session; the initiator refuses a mismatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationAck {
    pub version: u8,
    pub responder_did: String,
    /// Session key id (16 bytes, base64url).
    pub key_id: String,
    /// Echo of the invitation's envelope id.
    pub envelope_id: String,
    pub sent_at: DateTime<Utc>,
}

/// One encrypted application frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub version: u8,
    /// Session key id (base64url).
    pub key_id: String,
    /// 96-bit counter nonce (base64url).
    pub nonce: String,
    /// AEAD ciphertext (base64url).
    pub ciphertext: String,
    pub envelope_id: String,
    pub sent_at: DateTime<Utc>,
}

impl MessageEnvelope {
    pub fn from_packet(packet: &EncryptedPacket) -> Self {
        Self {
            version: WIRE_VERSION,
            key_id: URL_SAFE_NO_PAD.encode(packet.key_id),
            nonce: URL_SAFE_NO_PAD.encode(packet.nonce),
            ciphertext: URL_SAFE_NO_PAD.encode(&packet.ciphertext),
            envelope_id: uuid::Uuid::new_v4().to_string(),
            sent_at: Utc::now(),
        }
    }

    pub fn nonce_bytes(&self) -> Result<[u8; 12], WireError> {
        let raw = decode_b64(&self.nonce, "nonce")?;
        raw.as_slice()
            .try_into()
            .map_err(|_| WireError::MalformedMessage("nonce must be 12 bytes".into()))
    }

    pub fn key_id_bytes(&self) -> Result<[u8; 16], WireError> {
        let raw = decode_b64(&self.key_id, "key_id")?;
        raw.as_slice()
            .try_into()
            .map_err(|_| WireError::MalformedMessage("key id must be 16 bytes".into()))
    }

    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, WireError> {
        decode_b64(&self.ciphertext, "ciphertext")
    }
}

fn decode_b64(value: &str, field: &str) -> Result<Vec<u8>, WireError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| WireError::MalformedMessage(format!("bad base64 in {field}: {e}")))
}
