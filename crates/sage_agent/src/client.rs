//! Client (initiator) state machine.
//!
//! `Fresh → Resolved → Encapsulated → SessionOpen → Closed`
//!
//!   - `resolve_peer`      Fresh → Resolved; fails when the peer is
//!                         unknown or inactive
//!   - `initialize`        Resolved → Encapsulated; HPKE seal, mint the
//!                         pending session, send the signed invitation
//!   - `accept_server_ack` Encapsulated → SessionOpen; verify the
//!                         responder's signed acknowledgement and the
//!                         key id it references, then register
//!   - `close`             any state → Closed
//!
//! The pending session lives only in this struct until the ack
//! verifies; cancellation or failure anywhere drops it on the floor
//! (key material zeroizes) and the store never sees it.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use sage_crypto::ed25519::Ed25519KeyPair;
use sage_crypto::hpke::{seal_to_peer, HandshakeInfo, EXPORTER_CONTEXT_SESSION, EXPORTER_LEN};
use sage_crypto::kdf::Role;
use sage_did::resolver::{ResolvedAgent, Resolver};
use sage_did::AgentDid;
use sage_session::{SecureSession, SessionPolicy, SessionStore, SharedSession};
use sage_wire::message::{Invitation, InvitationAck, MessageEnvelope, WIRE_VERSION};
use sage_wire::signer::sign_request;
use sage_wire::verifier::{verify_response, StaticKeySource, VerifyPolicy};
use sage_wire::{SignedRequest, SignedResponse, Transport, WireError, INVITE_PATH, MESSAGE_PATH};

use crate::error::AgentError;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Channel context bound into the HPKE info.
    pub channel: String,
    /// `host` header value for signed requests.
    pub host: String,
    pub policy: SessionPolicy,
    pub verify: VerifyPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            channel: "direct".into(),
            host: "sage".into(),
            policy: SessionPolicy::default(),
            verify: VerifyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Fresh,
    Resolved,
    Encapsulated,
    SessionOpen,
    Closed,
}

pub struct AgentClient {
    local_did: AgentDid,
    peer_did: AgentDid,
    signing: Ed25519KeyPair,
    resolver: Arc<dyn Resolver>,
    transport: Arc<dyn Transport>,
    store: Arc<SessionStore>,
    config: ClientConfig,

    state: ClientState,
    peer: Option<ResolvedAgent>,
    /// Pending until the ack verifies; then moved into the store.
    pending: Option<SecureSession>,
    pending_envelope_id: Option<String>,
    session: Option<SharedSession>,
}

impl AgentClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_did: AgentDid,
        signing: Ed25519KeyPair,
        peer_did: AgentDid,
        resolver: Arc<dyn Resolver>,
        transport: Arc<dyn Transport>,
        store: Arc<SessionStore>,
        config: ClientConfig,
    ) -> Self {
        Self {
            local_did,
            peer_did,
            signing,
            resolver,
            transport,
            store,
            config,
            state: ClientState::Fresh,
            peer: None,
            pending: None,
            pending_envelope_id: None,
            session: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn session(&self) -> Option<SharedSession> {
        self.session.clone()
    }

    // ── Fresh → Resolved ─────────────────────────────────────────────

    pub async fn resolve_peer(&mut self, cancel: &CancellationToken) -> Result<(), AgentError> {
        if self.state != ClientState::Fresh {
            return Err(AgentError::BadState("resolve_peer requires Fresh"));
        }
        let peer = self.resolver.resolve(&self.peer_did, cancel).await?;
        tracing::debug!(peer = %self.peer_did, "peer resolved");
        self.peer = Some(peer);
        self.state = ClientState::Resolved;
        Ok(())
    }

    // ── Resolved → Encapsulated ──────────────────────────────────────

    /// HPKE-seal an invitation, mint the pending session, send the
    /// signed invite. Returns the raw response for `accept_server_ack`.
    pub async fn initialize(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<SignedResponse, AgentError> {
        if self.state != ClientState::Resolved {
            return Err(AgentError::BadState("initialize requires Resolved"));
        }
        let peer = self.peer.as_ref().ok_or(AgentError::BadState("no resolved peer"))?;

        let info = HandshakeInfo::new(
            self.config.channel.clone(),
            self.local_did.canonical(),
            self.peer_did.canonical(),
        )?;
        let envelope_id = uuid::Uuid::new_v4().to_string();

        // The sealed payload is the envelope id: the responder proves
        // decapsulation by echoing what only it could open.
        let sealed = seal_to_peer(
            &peer.kem_key,
            &info,
            EXPORTER_CONTEXT_SESSION,
            EXPORTER_LEN,
            envelope_id.as_bytes(),
            b"",
        )?;

        let session = SecureSession::from_exporter(
            &sealed.exporter_secret,
            Role::Initiator,
            self.local_did.canonical(),
            self.peer_did.canonical(),
            peer.signing_key.clone(),
            self.config.policy,
        )?;

        let invitation = Invitation {
            version: WIRE_VERSION,
            channel: self.config.channel.clone(),
            initiator_did: self.local_did.canonical(),
            responder_did: self.peer_did.canonical(),
            enc: b64(&sealed.enc),
            ciphertext: b64(&sealed.ciphertext),
            envelope_id: envelope_id.clone(),
            sent_at: Utc::now(),
        };

        let mut request =
            SignedRequest::new("POST", INVITE_PATH).with_body(serde_json::to_vec(&invitation)?);
        request.set_header("host", self.config.host.clone());
        // During the handshake the key id is the sender's DID.
        sign_request(
            &mut request,
            &self.signing,
            &self.local_did.canonical(),
            Utc::now().timestamp(),
            &uuid::Uuid::new_v4().to_string(),
        )?;

        let response = self.transport.send(request, cancel).await?;

        self.pending = Some(session);
        self.pending_envelope_id = Some(envelope_id);
        self.state = ClientState::Encapsulated;
        Ok(response)
    }

    // ── Encapsulated → SessionOpen ───────────────────────────────────

    pub async fn accept_server_ack(
        &mut self,
        response: SignedResponse,
    ) -> Result<(), AgentError> {
        if self.state != ClientState::Encapsulated {
            return Err(AgentError::BadState("accept_server_ack requires Encapsulated"));
        }
        let result = self.verify_ack(&response).await;
        match result {
            Ok(()) => {
                let mut session = self
                    .pending
                    .take()
                    .ok_or(AgentError::BadState("no pending session"))?;
                session.establish()?;
                self.session = Some(self.store.insert(session));
                self.pending_envelope_id = None;
                self.state = ClientState::SessionOpen;
                tracing::info!(peer = %self.peer_did, "session open");
                Ok(())
            }
            Err(e) => {
                // Failed handshake leaves nothing behind.
                self.pending = None;
                self.pending_envelope_id = None;
                self.state = ClientState::Closed;
                Err(e)
            }
        }
    }

    async fn verify_ack(&self, response: &SignedResponse) -> Result<(), AgentError> {
        if response.status != 200 {
            return Err(AgentError::Peer {
                status: response.status,
                detail: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        let peer = self.peer.as_ref().ok_or(AgentError::BadState("no resolved peer"))?;
        let pending = self
            .pending
            .as_ref()
            .ok_or(AgentError::BadState("no pending session"))?;

        let source = StaticKeySource::new(peer.signing_key.clone());
        let verified = verify_response(response, &source, &self.config.verify).await?;

        let ack: InvitationAck = serde_json::from_slice(&response.body)?;
        let expected_key_id = pending.key_id_b64();
        if verified.key_id != expected_key_id || ack.key_id != expected_key_id {
            return Err(AgentError::AckMismatch(
                "acknowledgement references a different key id".into(),
            ));
        }
        let ack_did: AgentDid = ack
            .responder_did
            .parse()
            .map_err(|_| AgentError::AckMismatch("unparseable responder DID".into()))?;
        if !ack_did.same_agent(&self.peer_did) {
            return Err(AgentError::AckMismatch("wrong responder DID".into()));
        }
        match &self.pending_envelope_id {
            Some(id) if *id == ack.envelope_id => {}
            _ => {
                return Err(AgentError::AckMismatch(
                    "acknowledgement answers a different invitation".into(),
                ))
            }
        }
        Ok(())
    }

    /// Drive the whole handshake.
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<(), AgentError> {
        self.resolve_peer(cancel).await?;
        let response = self.initialize(cancel).await?;
        self.accept_server_ack(response).await
    }

    // ── SessionOpen traffic ──────────────────────────────────────────

    /// Encrypt `plaintext`, send it signed, verify and decrypt the
    /// peer's answer.
    pub async fn send_message(
        &mut self,
        plaintext: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, AgentError> {
        if self.state != ClientState::SessionOpen {
            return Err(AgentError::BadState("send_message requires SessionOpen"));
        }
        let handle = self
            .session
            .clone()
            .ok_or(AgentError::Session(sage_session::SessionError::NoSession))?;

        let (envelope, key_id_b64) = {
            let mut session = handle.lock();
            let packet = session.encrypt(plaintext)?;
            (MessageEnvelope::from_packet(&packet), session.key_id_b64())
        };

        let mut request = SignedRequest::new("POST", MESSAGE_PATH)
            .with_body(serde_json::to_vec(&envelope)?);
        request.set_header("host", self.config.host.clone());
        sign_request(
            &mut request,
            &self.signing,
            &key_id_b64,
            Utc::now().timestamp(),
            &envelope.envelope_id,
        )?;

        let response = self.transport.send(request, cancel).await?;
        if response.status != 200 {
            return Err(AgentError::Peer {
                status: response.status,
                detail: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        let peer = self.peer.as_ref().ok_or(AgentError::BadState("no resolved peer"))?;
        let source = StaticKeySource::new(peer.signing_key.clone());
        let verified = verify_response(&response, &source, &self.config.verify).await?;
        if verified.key_id != key_id_b64 {
            return Err(AgentError::AckMismatch(
                "response signed for a different session".into(),
            ));
        }

        let reply: MessageEnvelope = serde_json::from_slice(&response.body)?;
        if reply.key_id != key_id_b64 {
            return Err(AgentError::Wire(WireError::MalformedMessage(
                "reply envelope for a different session".into(),
            )));
        }
        let nonce = reply.nonce_bytes()?;
        let ciphertext = reply.ciphertext_bytes()?;
        let plaintext = handle.lock().decrypt(&nonce, &ciphertext)?;
        Ok(plaintext.to_vec())
    }

    /// Any state → Closed. Idempotent.
    pub fn close(&mut self) {
        if let Some(handle) = self.session.take() {
            let session_id = {
                let mut session = handle.lock();
                session.close();
                session.session_id()
            };
            self.store.remove(&session_id);
        }
        self.pending = None;
        self.pending_envelope_id = None;
        self.state = ClientState::Closed;
    }
}

fn b64(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(bytes)
}
