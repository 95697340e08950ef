//! Server (responder) endpoint.
//!
//! On an invitation the server:
//!   (a) verifies the envelope signature against the declared
//!       initiator's resolved signing key
//!   (b) decapsulates the HPKE payload
//!   (c) derives the session
//!   (d) emits a signed acknowledgement referencing the session key id
//!   (e) registers the session
//! Any failure before (e) discards everything — partial state is never
//! retained.
//!
//! On a message it verifies, decrypts, hands the plaintext to the
//! `MessageHandler`, and answers encrypted under the same session.
//! Failure classes map to statuses: unknown DID 404, bad signature or
//! skew 401, replay 409, no session 404, expired session 410, decrypt
//! failures 400.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use sage_crypto::ed25519::Ed25519KeyPair;
use sage_crypto::hpke::{open_from_peer, EXPORTER_CONTEXT_SESSION, EXPORTER_LEN};
use sage_crypto::kdf::Role;
use sage_crypto::x25519::KemKeyPair;
use sage_did::resolver::Resolver;
use sage_did::{AgentDid, DidError};
use sage_session::{
    ReplayCache, SecureSession, SessionError, SessionPolicy, SessionStore,
};
use sage_wire::message::{Invitation, InvitationAck, MessageEnvelope, WIRE_VERSION};
use sage_wire::sigbase::parse_signature_input;
use sage_wire::signer::sign_response;
use sage_wire::verifier::{verify_request, SessionKeySource, StaticKeySource, VerifyPolicy};
use sage_wire::{
    RequestHandler, SignedRequest, SignedResponse, WireError, INVITE_PATH, MESSAGE_PATH,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub policy: SessionPolicy,
    pub verify: VerifyPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            policy: SessionPolicy::default(),
            verify: VerifyPolicy::default(),
        }
    }
}

/// Application callback for decrypted traffic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, peer_did: &str, plaintext: &[u8]) -> Vec<u8>;
}

/// Reference handler: answers `{"from":"server","ok":true,"echo":...}`.
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn on_message(&self, _peer_did: &str, plaintext: &[u8]) -> Vec<u8> {
        let echoed = serde_json::to_string(&String::from_utf8_lossy(plaintext).into_owned())
            .unwrap_or_else(|_| "\"\"".into());
        format!(r#"{{"from":"server","ok":true,"echo":{echoed}}}"#).into_bytes()
    }
}

pub struct AgentServer {
    local_did: AgentDid,
    signing: Ed25519KeyPair,
    kem: KemKeyPair,
    resolver: Arc<dyn Resolver>,
    store: Arc<SessionStore>,
    replay: Arc<ReplayCache>,
    config: ServerConfig,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
}

impl AgentServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_did: AgentDid,
        signing: Ed25519KeyPair,
        kem: KemKeyPair,
        resolver: Arc<dyn Resolver>,
        store: Arc<SessionStore>,
        config: ServerConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let replay = Arc::new(ReplayCache::new(config.verify.max_skew));
        Self {
            local_did,
            signing,
            kem,
            resolver,
            store,
            replay,
            config,
            handler,
            cancel: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> Arc<SessionStore> {
        self.store.clone()
    }

    /// Stop serving: pending resolver calls abort with `cancelled`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // ── Invitation ───────────────────────────────────────────────────

    async fn handle_invite(&self, request: SignedRequest) -> Result<SignedResponse, (u16, String)> {
        // The keyid names the initiator; resolve it before verifying.
        let input = request
            .header("signature-input")
            .ok_or((401, "missing signature".to_string()))?;
        let (_, params) =
            parse_signature_input(input).map_err(|e| (401, format!("signature-invalid: {e}")))?;
        let initiator_did: AgentDid = params
            .key_id
            .parse()
            .map_err(|_| (401, "signature-invalid: keyid is not a DID".to_string()))?;

        let initiator = self
            .resolver
            .resolve(&initiator_did, &self.cancel)
            .await
            .map_err(|e| match e {
                DidError::IdentityNotFound(d) => (404, format!("identity-not-found: {d}")),
                DidError::IdentityInactive(d) => (404, format!("identity-inactive: {d}")),
                other => (500, other.to_string()),
            })?;

        let source = StaticKeySource::new(initiator.signing_key.clone());
        verify_request(&request, &source, &self.replay, &self.config.verify)
            .await
            .map_err(map_wire_error)?;

        let invitation: Invitation = serde_json::from_slice(&request.body)
            .map_err(|e| (400, format!("invalid-input: {e}")))?;
        if invitation.version != WIRE_VERSION {
            return Err((400, "invalid-input: unknown wire version".into()));
        }

        // The envelope's identity claims, the signature's keyid and the
        // HPKE info must all agree.
        let claimed: AgentDid = invitation
            .initiator_did
            .parse()
            .map_err(|_| (400, "invalid-input: bad initiator DID".to_string()))?;
        if !claimed.same_agent(&initiator_did) {
            return Err((401, "signature-invalid: initiator mismatch".into()));
        }
        let responder: AgentDid = invitation
            .responder_did
            .parse()
            .map_err(|_| (400, "invalid-input: bad responder DID".to_string()))?;
        if !responder.same_agent(&self.local_did) {
            return Err((400, "invalid-input: invitation addressed elsewhere".into()));
        }

        let info = invitation
            .handshake_info()
            .map_err(|e| (400, format!("invalid-input: {e}")))?;

        let enc = invitation
            .enc_bytes()
            .map_err(|e| (400, format!("invalid-input: {e}")))?;
        let ciphertext = invitation
            .ciphertext_bytes()
            .map_err(|e| (400, format!("invalid-input: {e}")))?;

        let opened = open_from_peer(
            &self.kem,
            &enc,
            &info,
            EXPORTER_CONTEXT_SESSION,
            EXPORTER_LEN,
            &ciphertext,
            b"",
        )
        .map_err(|e| (400, format!("decrypt-failed: {e}")))?;

        // Proof of decapsulation: the sealed payload is the envelope id.
        if opened.plaintext.as_slice() != invitation.envelope_id.as_bytes() {
            return Err((400, "decrypt-failed: invitation payload mismatch".into()));
        }

        let mut session = SecureSession::from_exporter(
            &opened.exporter_secret,
            Role::Responder,
            self.local_did.canonical(),
            claimed.canonical(),
            initiator.signing_key.clone(),
            self.config.policy,
        )
        .map_err(|e| (500, e.to_string()))?;
        session
            .establish()
            .map_err(|e| (500, e.to_string()))?;
        let key_id_b64 = session.key_id_b64();

        let ack = InvitationAck {
            version: WIRE_VERSION,
            responder_did: self.local_did.canonical(),
            key_id: key_id_b64.clone(),
            envelope_id: invitation.envelope_id.clone(),
            sent_at: Utc::now(),
        };
        let body = serde_json::to_vec(&ack).map_err(|e| (500, e.to_string()))?;
        let mut response = SignedResponse::new(200).with_body(body);
        sign_response(
            &mut response,
            &self.signing,
            &key_id_b64,
            Utc::now().timestamp(),
            &uuid::Uuid::new_v4().to_string(),
        )
        .map_err(|e| (500, e.to_string()))?;

        // Register last — everything above can still fail cleanly.
        self.store.insert(session);
        tracing::info!(peer = %claimed, "session established");
        Ok(response)
    }

    // ── Application traffic ──────────────────────────────────────────

    async fn handle_message(&self, request: SignedRequest) -> Result<SignedResponse, (u16, String)> {
        let source = SessionKeySource::new(self.store.clone());
        let verified = verify_request(&request, &source, &self.replay, &self.config.verify)
            .await
            .map_err(map_wire_error)?;

        let envelope: MessageEnvelope = serde_json::from_slice(&request.body)
            .map_err(|e| (400, format!("invalid-input: {e}")))?;
        if envelope.key_id != verified.key_id {
            return Err((401, "signature-invalid: envelope/signature key id mismatch".into()));
        }

        let key_id = envelope
            .key_id_bytes()
            .map_err(|e| (400, format!("invalid-input: {e}")))?;
        let handle = self
            .store
            .get_by_key_id(&key_id)
            .ok_or((404, "no-session".to_string()))?;

        let nonce = envelope
            .nonce_bytes()
            .map_err(|e| (400, format!("invalid-input: {e}")))?;
        let ciphertext = envelope
            .ciphertext_bytes()
            .map_err(|e| (400, format!("invalid-input: {e}")))?;

        let (plaintext, peer_did) = {
            let mut session = handle.lock();
            let plaintext = session.decrypt(&nonce, &ciphertext).map_err(map_session_error)?;
            (plaintext.to_vec(), session.peer_did().to_owned())
        };

        let reply_plain = self.handler.on_message(&peer_did, &plaintext).await;

        let (packet, key_id_b64) = {
            let mut session = handle.lock();
            let packet = session.encrypt(&reply_plain).map_err(map_session_error)?;
            (packet, session.key_id_b64())
        };
        let reply = MessageEnvelope::from_packet(&packet);
        let body = serde_json::to_vec(&reply).map_err(|e| (500, e.to_string()))?;

        let mut response = SignedResponse::new(200).with_body(body);
        sign_response(
            &mut response,
            &self.signing,
            &key_id_b64,
            Utc::now().timestamp(),
            &reply.envelope_id,
        )
        .map_err(|e| (500, e.to_string()))?;
        Ok(response)
    }
}

fn map_wire_error(e: WireError) -> (u16, String) {
    match e {
        WireError::Replay => (409, "replay".into()),
        WireError::NoSession => (404, "no-session".into()),
        WireError::SkewExceeded { .. } => (401, format!("signature-invalid: {e}")),
        WireError::SignatureInvalid(_) | WireError::MissingHeader(_) => {
            (401, format!("signature-invalid: {e}"))
        }
        other => (400, other.to_string()),
    }
}

fn map_session_error(e: SessionError) -> (u16, String) {
    match e {
        SessionError::Expired => (410, "session-expired".into()),
        SessionError::NoSession => (404, "no-session".into()),
        other => (400, format!("decrypt-failed: {other}")),
    }
}

#[async_trait]
impl RequestHandler for AgentServer {
    async fn handle(&self, request: SignedRequest) -> SignedResponse {
        let result = match request.path.as_str() {
            INVITE_PATH => self.handle_invite(request).await,
            MESSAGE_PATH => self.handle_message(request).await,
            other => Err((404, format!("unknown path {other}"))),
        };
        match result {
            Ok(response) => response,
            Err((status, detail)) => {
                tracing::debug!(status, %detail, "request rejected");
                SignedResponse::new(status)
                    .with_body(format!(r#"{{"error":{}}}"#, serde_json::to_string(&detail).unwrap_or_default()).into_bytes())
            }
        }
    }
}

/// Spawn a reaper that sweeps the store until the server shuts down.
/// Purely an optimization — every lookup checks expiry inline.
pub fn spawn_reaper(store: Arc<SessionStore>, period: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => {
                    store.reap();
                }
            }
        }
    });
}
