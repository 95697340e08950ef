//! Verification side of RFC 9421.
//!
//! Policy, in order:
//!   1. parse `Signature-Input`, locate `sig1`
//!   2. reject when `created` deviates from local time by more than
//!      `max_skew` — independent of signature correctness
//!   3. resolve `keyid` to an Ed25519 key (session store, or the
//!      resolver during the handshake)
//!   4. reconstruct the base — including the content-digest/body check
//!   5. verify the signature
//!   6. replay guard: a repeated (keyid, nonce) inside the window is
//!      rejected even if everything else checks out

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;

use sage_crypto::ed25519::Ed25519KeyPair;
use sage_crypto::keys::{PublicKeyBytes, SigningPair};
use sage_session::{ReplayCache, SessionStore};

use crate::digest::matches_body;
use crate::error::WireError;
use crate::http::{SignedRequest, SignedResponse};
use crate::sigbase::{
    build_base, parse_signature, parse_signature_input, request_component_value,
    response_component_value, ALG_ED25519,
};

#[derive(Debug, Clone, Copy)]
pub struct VerifyPolicy {
    /// Bidirectional tolerance on `created`.
    pub max_skew: Duration,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            max_skew: Duration::from_secs(300),
        }
    }
}

/// What a verified message proves.
#[derive(Debug, Clone)]
pub struct VerifiedSignature {
    pub key_id: String,
    pub nonce: String,
    pub created: i64,
}

/// Where `keyid` values resolve to public keys.
#[async_trait]
pub trait SignatureKeySource: Send + Sync {
    async fn signing_key_for(&self, key_id: &str) -> Result<PublicKeyBytes, WireError>;
}

/// Handshake-phase source: the caller already knows exactly which key
/// must have signed (the resolved peer's static key); any `keyid`
/// resolves to it and the signature check does the rest.
pub struct StaticKeySource {
    key: PublicKeyBytes,
}

impl StaticKeySource {
    pub fn new(key: PublicKeyBytes) -> Self {
        Self { key }
    }
}

#[async_trait]
impl SignatureKeySource for StaticKeySource {
    async fn signing_key_for(&self, _key_id: &str) -> Result<PublicKeyBytes, WireError> {
        Ok(self.key.clone())
    }
}

/// Post-handshake source: `keyid` is a session key id; the session
/// carries the peer's static signing key captured at resolution time.
pub struct SessionKeySource {
    store: Arc<SessionStore>,
}

impl SessionKeySource {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SignatureKeySource for SessionKeySource {
    async fn signing_key_for(&self, key_id: &str) -> Result<PublicKeyBytes, WireError> {
        let raw = URL_SAFE_NO_PAD
            .decode(key_id)
            .map_err(|_| WireError::NoSession)?;
        let key_id: [u8; 16] = raw.as_slice().try_into().map_err(|_| WireError::NoSession)?;
        let session = self.store.get_by_key_id(&key_id).ok_or(WireError::NoSession)?;
        let key = session.lock().peer_signing_key().clone();
        Ok(key)
    }
}

fn check_skew(created: i64, policy: &VerifyPolicy) -> Result<(), WireError> {
    let skew = (Utc::now().timestamp() - created).abs();
    if skew as u64 > policy.max_skew.as_secs() {
        return Err(WireError::SkewExceeded {
            skew_secs: skew,
            max_secs: policy.max_skew.as_secs(),
        });
    }
    Ok(())
}

pub async fn verify_request(
    req: &SignedRequest,
    source: &dyn SignatureKeySource,
    replay: &ReplayCache,
    policy: &VerifyPolicy,
) -> Result<VerifiedSignature, WireError> {
    let input = req
        .header("signature-input")
        .ok_or(WireError::MissingHeader("signature-input"))?;
    let (covered, params) = parse_signature_input(input)?;
    if params.alg != ALG_ED25519 {
        return Err(WireError::SignatureInvalid(format!(
            "unsupported alg {:?}",
            params.alg
        )));
    }

    check_skew(params.created, policy)?;

    let public = source.signing_key_for(&params.key_id).await?;

    // Body binding: if the digest is covered it must match the body we
    // actually received.
    if covered.iter().any(|c| c == "content-digest") {
        let digest = req
            .header("content-digest")
            .ok_or(WireError::MissingHeader("content-digest"))?;
        if !matches_body(digest, &req.body) {
            return Err(WireError::SignatureInvalid(
                "content-digest does not match body".into(),
            ));
        }
    }

    let mut components = Vec::with_capacity(covered.len());
    for name in &covered {
        components.push((name.clone(), request_component_value(req, name)?));
    }
    let covered_refs: Vec<&str> = covered.iter().map(String::as_str).collect();
    let base = build_base(&components, &params.serialize(&covered_refs));

    let sig = parse_signature(
        req.header("signature")
            .ok_or(WireError::MissingHeader("signature"))?,
    )?;
    Ed25519KeyPair::verify(&public.0, base.as_bytes(), &sig)
        .map_err(|_| WireError::SignatureInvalid("signature mismatch".into()))?;

    if replay.seen_once(&params.key_id, &params.nonce) {
        return Err(WireError::Replay);
    }

    Ok(VerifiedSignature {
        key_id: params.key_id,
        nonce: params.nonce,
        created: params.created,
    })
}

/// Response verification: same policy, response components, and no
/// replay marking (a response answers exactly one request).
pub async fn verify_response(
    resp: &SignedResponse,
    source: &dyn SignatureKeySource,
    policy: &VerifyPolicy,
) -> Result<VerifiedSignature, WireError> {
    let input = resp
        .header("signature-input")
        .ok_or(WireError::MissingHeader("signature-input"))?;
    let (covered, params) = parse_signature_input(input)?;
    if params.alg != ALG_ED25519 {
        return Err(WireError::SignatureInvalid(format!(
            "unsupported alg {:?}",
            params.alg
        )));
    }

    check_skew(params.created, policy)?;

    let public = source.signing_key_for(&params.key_id).await?;

    if covered.iter().any(|c| c == "content-digest") {
        let digest = resp
            .header("content-digest")
            .ok_or(WireError::MissingHeader("content-digest"))?;
        if !matches_body(digest, &resp.body) {
            return Err(WireError::SignatureInvalid(
                "content-digest does not match body".into(),
            ));
        }
    }

    let mut components = Vec::with_capacity(covered.len());
    for name in &covered {
        components.push((name.clone(), response_component_value(resp, name)?));
    }
    let covered_refs: Vec<&str> = covered.iter().map(String::as_str).collect();
    let base = build_base(&components, &params.serialize(&covered_refs));

    let sig = parse_signature(
        resp.header("signature")
            .ok_or(WireError::MissingHeader("signature"))?,
    )?;
    Ed25519KeyPair::verify(&public.0, base.as_bytes(), &sig)
        .map_err(|_| WireError::SignatureInvalid("signature mismatch".into()))?;

    Ok(VerifiedSignature {
        key_id: params.key_id,
        nonce: params.nonce,
        created: params.created,
    })
}
