//! HPKE base mode, single shot (RFC 9180).
//!
//! Suite: DHKEM(X25519, HKDF-SHA256) / HKDF-SHA256 / ChaCha20-Poly1305
//!        (kem_id 0x0020, kdf_id 0x0001, aead_id 0x0003)
//!
//! The handshake uses exactly one seal per invitation:
//!   initiator: SealToPeer(pkR, info, ...)  → (enc, ciphertext, exporter)
//!   responder: OpenFromPeer(skR, enc, ...) → (plaintext, exporter)
//! Both sides derive the SAME exporter secret; the session layer turns
//! it into ids and directional keys (see `kdf`).
//!
//! `info` is a structured, versioned ASCII blob binding the channel and
//! both DIDs:
//!   "sage/hpke-handshake v1|ctx:<channel>|init:<did>|resp:<did>"
//! Callers MUST cross-check the decoded DIDs against what the identity
//! layer claims before trusting anything derived here.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aead;
use crate::error::CryptoError;
use crate::keys::{KeyKind, KeyPair, PublicKeyBytes};
use crate::x25519::KemKeyPair;

pub const KEM_ID: u16 = 0x0020;
pub const KDF_ID: u16 = 0x0001;
pub const AEAD_ID: u16 = 0x0003;

const VERSION_LABEL: &[u8] = b"HPKE-v1";
const INFO_PREFIX: &str = "sage/hpke-handshake v1";

/// Default exporter context for session seeds.
pub const EXPORTER_CONTEXT_SESSION: &[u8] = b"sage/session-seed";
/// Default exporter length (one 32-byte seed).
pub const EXPORTER_LEN: usize = 32;

fn kem_suite_id() -> [u8; 5] {
    let mut id = *b"KEM\x00\x00";
    id[3..].copy_from_slice(&KEM_ID.to_be_bytes());
    id
}

fn hpke_suite_id() -> [u8; 10] {
    let mut id = *b"HPKE\x00\x00\x00\x00\x00\x00";
    id[4..6].copy_from_slice(&KEM_ID.to_be_bytes());
    id[6..8].copy_from_slice(&KDF_ID.to_be_bytes());
    id[8..10].copy_from_slice(&AEAD_ID.to_be_bytes());
    id
}

// ── Labeled HKDF (RFC 9180 §4) ───────────────────────────────────────────────

fn labeled_extract(suite_id: &[u8], salt: &[u8], label: &[u8], ikm: &[u8]) -> [u8; 32] {
    let mut labeled_ikm =
        Vec::with_capacity(VERSION_LABEL.len() + suite_id.len() + label.len() + ikm.len());
    labeled_ikm.extend_from_slice(VERSION_LABEL);
    labeled_ikm.extend_from_slice(suite_id);
    labeled_ikm.extend_from_slice(label);
    labeled_ikm.extend_from_slice(ikm);
    let (prk, _) = hkdf::Hkdf::<sha2::Sha256>::extract(Some(salt), &labeled_ikm);
    labeled_ikm.zeroize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&prk);
    out
}

fn labeled_expand(
    suite_id: &[u8],
    prk: &[u8; 32],
    label: &[u8],
    info: &[u8],
    out: &mut [u8],
) -> Result<(), CryptoError> {
    let mut labeled_info =
        Vec::with_capacity(2 + VERSION_LABEL.len() + suite_id.len() + label.len() + info.len());
    labeled_info.extend_from_slice(&(out.len() as u16).to_be_bytes());
    labeled_info.extend_from_slice(VERSION_LABEL);
    labeled_info.extend_from_slice(suite_id);
    labeled_info.extend_from_slice(label);
    labeled_info.extend_from_slice(info);
    let hk = hkdf::Hkdf::<sha2::Sha256>::from_prk(prk)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hk.expand(&labeled_info, out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

// ── DHKEM(X25519, HKDF-SHA256) ───────────────────────────────────────────────

/// `ExtractAndExpand(dh, kem_context)` from RFC 9180 §4.1.
fn extract_and_expand(dh: &[u8], kem_context: &[u8]) -> Result<[u8; 32], CryptoError> {
    let suite = kem_suite_id();
    let eae_prk = labeled_extract(&suite, b"", b"eae_prk", dh);
    let mut shared_secret = [0u8; 32];
    labeled_expand(&suite, &eae_prk, b"shared_secret", kem_context, &mut shared_secret)?;
    Ok(shared_secret)
}

fn encap(peer_public: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let sk_e = StaticSecret::random_from_rng(OsRng);
    let pk_e = X25519Public::from(&sk_e);
    let pk_r = X25519Public::from(*peer_public);

    let dh = sk_e.diffie_hellman(&pk_r);
    if !dh.was_contributory() {
        return Err(CryptoError::InvalidKey("low-order KEM public key".into()));
    }

    let enc = pk_e.to_bytes();
    let mut kem_context = [0u8; 64];
    kem_context[..32].copy_from_slice(&enc);
    kem_context[32..].copy_from_slice(peer_public);

    let shared_secret = extract_and_expand(dh.as_bytes(), &kem_context)?;
    Ok((shared_secret, enc))
}

fn decap(local: &KemKeyPair, enc: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let sk_r = local.static_secret();
    let pk_e = X25519Public::from(*enc);

    let dh = sk_r.diffie_hellman(&pk_e);
    if !dh.was_contributory() {
        return Err(CryptoError::InvalidKey("low-order encapsulated key".into()));
    }

    let local_pub = local.public().as_array_32()?;
    let mut kem_context = [0u8; 64];
    kem_context[..32].copy_from_slice(enc);
    kem_context[32..].copy_from_slice(&local_pub);

    extract_and_expand(dh.as_bytes(), &kem_context)
}

// ── Key schedule (base mode) ─────────────────────────────────────────────────

#[derive(ZeroizeOnDrop)]
struct KeySchedule {
    key: [u8; 32],
    base_nonce: [u8; 12],
    exporter_secret: [u8; 32],
}

fn key_schedule(shared_secret: &[u8; 32], info: &[u8]) -> Result<KeySchedule, CryptoError> {
    let suite = hpke_suite_id();

    let psk_id_hash = labeled_extract(&suite, b"", b"psk_id_hash", b"");
    let info_hash = labeled_extract(&suite, b"", b"info_hash", info);

    // mode_base = 0x00
    let mut ks_context = Vec::with_capacity(1 + 64);
    ks_context.push(0x00);
    ks_context.extend_from_slice(&psk_id_hash);
    ks_context.extend_from_slice(&info_hash);

    let secret = labeled_extract(&suite, shared_secret, b"secret", b"");

    let mut key = [0u8; 32];
    let mut base_nonce = [0u8; 12];
    let mut exporter_secret = [0u8; 32];
    labeled_expand(&suite, &secret, b"key", &ks_context, &mut key)?;
    labeled_expand(&suite, &secret, b"base_nonce", &ks_context, &mut base_nonce)?;
    labeled_expand(&suite, &secret, b"exp", &ks_context, &mut exporter_secret)?;

    Ok(KeySchedule {
        key,
        base_nonce,
        exporter_secret,
    })
}

fn export(
    schedule: &KeySchedule,
    exporter_context: &[u8],
    exporter_len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if exporter_len == 0 || exporter_len > 255 * 32 {
        return Err(CryptoError::KeyDerivation(format!(
            "exporter length {exporter_len} out of range"
        )));
    }
    let mut out = Zeroizing::new(vec![0u8; exporter_len]);
    labeled_expand(
        &hpke_suite_id(),
        &schedule.exporter_secret,
        b"sec",
        exporter_context,
        &mut out,
    )?;
    Ok(out)
}

// ── Handshake info ───────────────────────────────────────────────────────────

/// The versioned `info` blob binding channel and both identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub channel: String,
    pub initiator_did: String,
    pub responder_did: String,
}

impl HandshakeInfo {
    pub fn new(
        channel: impl Into<String>,
        initiator_did: impl Into<String>,
        responder_did: impl Into<String>,
    ) -> Result<Self, CryptoError> {
        let info = Self {
            channel: channel.into(),
            initiator_did: initiator_did.into(),
            responder_did: responder_did.into(),
        };
        for field in [&info.channel, &info.initiator_did, &info.responder_did] {
            if field.is_empty() || field.contains('|') || !field.is_ascii() {
                return Err(CryptoError::InvalidInfo(format!(
                    "info field {field:?} must be non-empty ASCII without '|'"
                )));
            }
        }
        Ok(info)
    }

    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{INFO_PREFIX}|ctx:{}|init:{}|resp:{}",
            self.channel, self.initiator_did, self.responder_did
        )
        .into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CryptoError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|_| CryptoError::InvalidInfo("info is not ASCII".into()))?;
        let mut parts = s.split('|');
        if parts.next() != Some(INFO_PREFIX) {
            return Err(CryptoError::InvalidInfo("unknown info version".into()));
        }
        let mut take = |prefix: &str| -> Result<String, CryptoError> {
            parts
                .next()
                .and_then(|p| p.strip_prefix(prefix))
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .ok_or_else(|| CryptoError::InvalidInfo(format!("missing {prefix} field")))
        };
        let channel = take("ctx:")?;
        let initiator_did = take("init:")?;
        let responder_did = take("resp:")?;
        if parts.next().is_some() {
            return Err(CryptoError::InvalidInfo("trailing info fields".into()));
        }
        Ok(Self {
            channel,
            initiator_did,
            responder_did,
        })
    }
}

// ── Single-shot seal / open ──────────────────────────────────────────────────

/// Initiator output: the encapsulated key and invitation ciphertext go on
/// the wire; the exporter secret stays local and seeds the session.
pub struct SealedInvitation {
    pub enc: [u8; 32],
    pub ciphertext: Vec<u8>,
    pub exporter_secret: Zeroizing<Vec<u8>>,
}

/// Responder output.
pub struct OpenedInvitation {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub exporter_secret: Zeroizing<Vec<u8>>,
}

/// Encapsulate to `peer_kem_public`, seal `payload` at sequence 0, and
/// export `exporter_len` bytes under `exporter_context`.
pub fn seal_to_peer(
    peer_kem_public: &PublicKeyBytes,
    info: &HandshakeInfo,
    exporter_context: &[u8],
    exporter_len: usize,
    payload: &[u8],
    aad: &[u8],
) -> Result<SealedInvitation, CryptoError> {
    KeyKind::X25519.validate(&peer_kem_public.0)?;
    let peer = peer_kem_public.as_array_32()?;

    let info_bytes = info.encode();
    let (mut shared_secret, enc) = encap(&peer)?;
    let schedule = key_schedule(&shared_secret, &info_bytes)?;
    shared_secret.zeroize();

    let ciphertext = aead::seal(&schedule.key, &schedule.base_nonce, payload, aad)?;
    let exporter_secret = export(&schedule, exporter_context, exporter_len)?;

    Ok(SealedInvitation {
        enc,
        ciphertext,
        exporter_secret,
    })
}

/// Decapsulate `enc` with the local KEM key, open the invitation
/// ciphertext, and derive the same exporter secret as the initiator.
pub fn open_from_peer(
    local: &KemKeyPair,
    enc: &[u8],
    info: &HandshakeInfo,
    exporter_context: &[u8],
    exporter_len: usize,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<OpenedInvitation, CryptoError> {
    let enc: [u8; 32] = enc
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("encapsulated key must be 32 bytes".into()))?;

    let info_bytes = info.encode();
    let mut shared_secret = decap(local, &enc)?;
    let schedule = key_schedule(&shared_secret, &info_bytes)?;
    shared_secret.zeroize();

    let plaintext = aead::open(&schedule.key, &schedule.base_nonce, ciphertext, aad)?;
    let exporter_secret = export(&schedule, exporter_context, exporter_len)?;

    Ok(OpenedInvitation {
        plaintext,
        exporter_secret,
    })
}
