//! Full-stack scenarios: registry → resolution → handshake → signed,
//! encrypted traffic over the loopback binding.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use sage_agent::{
    AgentClient, AgentError, AgentServer, ClientConfig, ClientState, EchoHandler, ServerConfig,
};
use sage_crypto::ed25519::Ed25519KeyPair;
use sage_crypto::keys::KeyPair;
use sage_crypto::ecdsa::EcdsaKeyPair;
use sage_crypto::x25519::KemKeyPair;
use sage_did::ledger::InMemoryRegistry;
use sage_did::registry::RegistryClient;
use sage_did::resolver::{RegistryResolver, Resolver};
use sage_did::{AgentDid, Chain, DidError};
use sage_session::{SessionError, SessionPolicy, SessionStore};
use sage_wire::message::MessageEnvelope;
use sage_wire::signer::sign_request;
use sage_wire::{
    LoopbackTransport, RequestHandler, SignedRequest, Transport, MESSAGE_PATH,
};

struct Party {
    owner: EcdsaKeyPair,
    signing: Ed25519KeyPair,
    kem: KemKeyPair,
    did: AgentDid,
}

fn party() -> Party {
    let owner = EcdsaKeyPair::generate().unwrap();
    let signing = Ed25519KeyPair::generate().unwrap();
    let kem = KemKeyPair::generate().unwrap();
    let did = AgentDid::new(Chain::Ethereum, owner.address().unwrap());
    Party {
        owner,
        signing,
        kem,
        did,
    }
}

async fn register(registry: &Arc<InMemoryRegistry>, client: &RegistryClient, p: &Party) {
    let cancel = CancellationToken::new();
    let req = client
        .prepare_registration(
            &p.owner,
            &p.did,
            "agent",
            "",
            "https://agent.example",
            r#"{"chat":true}"#,
            &p.signing,
            &p.kem,
        )
        .unwrap();
    let stake = registry.params().registration_stake;
    client.commit(&req, stake, &cancel).await.unwrap();
    registry.advance_time(61).await;
    let agent_id = client.reveal(&req, &cancel).await.unwrap();
    registry.advance_time(3_600).await;
    client.activate(req.owner, agent_id, &cancel).await.unwrap();
}

struct World {
    server: Arc<AgentServer>,
    client: AgentClient,
    client_store: Arc<SessionStore>,
    server_store: Arc<SessionStore>,
    alice_signing_secret: [u8; 32],
}

async fn world(client_policy: SessionPolicy) -> World {
    let registry = Arc::new(InMemoryRegistry::with_defaults(Chain::Ethereum, 1));
    let reg_client = RegistryClient::new(registry.clone());

    let alice = party();
    let bob = party();
    register(&registry, &reg_client, &alice).await;
    register(&registry, &reg_client, &bob).await;

    let resolver: Arc<dyn Resolver> = Arc::new(RegistryResolver::new(registry.clone()));

    let server_store = Arc::new(SessionStore::new());
    let server = Arc::new(AgentServer::new(
        bob.did.clone(),
        bob.signing,
        bob.kem,
        resolver.clone(),
        server_store.clone(),
        ServerConfig::default(),
        Arc::new(EchoHandler),
    ));
    let transport: Arc<dyn Transport> = Arc::new(LoopbackTransport::spawn(server.clone()));

    let client_store = Arc::new(SessionStore::new());
    let alice_signing_secret = *alice.signing.secret_bytes();
    let client = AgentClient::new(
        alice.did.clone(),
        alice.signing,
        bob.did.clone(),
        resolver,
        transport,
        client_store.clone(),
        ClientConfig {
            policy: client_policy,
            ..ClientConfig::default()
        },
    );

    World {
        server,
        client,
        client_store,
        server_store,
        alice_signing_secret,
    }
}

#[tokio::test]
async fn handshake_and_echo() {
    let mut w = world(SessionPolicy::default()).await;
    let cancel = CancellationToken::new();

    w.client.connect(&cancel).await.unwrap();
    assert_eq!(w.client.state(), ClientState::SessionOpen);

    let reply = w.client.send_message(b"hello", &cancel).await.unwrap();
    assert_eq!(reply, br#"{"from":"server","ok":true,"echo":"hello"}"#);

    // Both endpoints minted the same deterministic session.
    let handle = w.client.session().unwrap();
    let session_id = handle.lock().session_id();
    assert!(w.server_store.get_by_session_id(&session_id).is_some());
    assert_eq!(w.client_store.len(), 1);
}

#[tokio::test]
async fn multiple_messages_keep_strict_order() {
    let mut w = world(SessionPolicy::default()).await;
    let cancel = CancellationToken::new();
    w.client.connect(&cancel).await.unwrap();

    for text in ["one", "two", "three"] {
        let reply = w.client.send_message(text.as_bytes(), &cancel).await.unwrap();
        let expected = format!(r#"{{"from":"server","ok":true,"echo":"{text}"}}"#);
        assert_eq!(reply, expected.as_bytes());
    }

    let handle = w.client.session().unwrap();
    let session = handle.lock();
    assert_eq!(session.messages_sent(), 3);
    assert_eq!(session.messages_received(), 3);
}

#[tokio::test]
async fn replayed_request_bytes_rejected() {
    let mut w = world(SessionPolicy::default()).await;
    let cancel = CancellationToken::new();
    w.client.connect(&cancel).await.unwrap();

    // Build one signed message by hand so the exact bytes can be
    // replayed.
    let alice_signing = Ed25519KeyPair::from_secret_bytes(&w.alice_signing_secret).unwrap();
    let handle = w.client.session().unwrap();
    let (envelope, key_id_b64) = {
        let mut session = handle.lock();
        let packet = session.encrypt(b"replay me").unwrap();
        (MessageEnvelope::from_packet(&packet), session.key_id_b64())
    };
    let mut request =
        SignedRequest::new("POST", MESSAGE_PATH).with_body(serde_json::to_vec(&envelope).unwrap());
    request.set_header("host", "sage");
    sign_request(
        &mut request,
        &alice_signing,
        &key_id_b64,
        Utc::now().timestamp(),
        &envelope.envelope_id,
    )
    .unwrap();

    let first = w.server.handle(request.clone()).await;
    assert_eq!(first.status, 200);

    // Identical bytes again, moments later.
    let second = w.server.handle(request).await;
    assert_eq!(second.status, 409);
    assert!(String::from_utf8_lossy(&second.body).contains("replay"));
}

#[tokio::test]
async fn tampered_date_header_rejected() {
    let mut w = world(SessionPolicy::default()).await;
    let cancel = CancellationToken::new();
    w.client.connect(&cancel).await.unwrap();

    let alice_signing = Ed25519KeyPair::from_secret_bytes(&w.alice_signing_secret).unwrap();
    let handle = w.client.session().unwrap();
    let (envelope, key_id_b64) = {
        let mut session = handle.lock();
        let packet = session.encrypt(b"payload").unwrap();
        (MessageEnvelope::from_packet(&packet), session.key_id_b64())
    };
    let mut request =
        SignedRequest::new("POST", MESSAGE_PATH).with_body(serde_json::to_vec(&envelope).unwrap());
    request.set_header("host", "sage");
    sign_request(
        &mut request,
        &alice_signing,
        &key_id_b64,
        Utc::now().timestamp(),
        &envelope.envelope_id,
    )
    .unwrap();

    // One byte of the covered date flips.
    let date = request.header("date").unwrap().to_owned();
    let mut bytes = date.into_bytes();
    bytes[0] ^= 1;
    request.set_header("date", String::from_utf8(bytes).unwrap());

    let response = w.server.handle(request).await;
    assert_eq!(response.status, 401);
    assert!(String::from_utf8_lossy(&response.body).contains("signature-invalid"));
}

#[tokio::test]
async fn idle_session_expires_and_vanishes() {
    let policy = SessionPolicy {
        idle_timeout: Duration::from_secs(2),
        ..SessionPolicy::default()
    };
    let mut w = world(policy).await;
    let cancel = CancellationToken::new();
    w.client.connect(&cancel).await.unwrap();

    let handle = w.client.session().unwrap();
    let key_id = handle.lock().key_id();

    tokio::time::sleep(Duration::from_millis(2_500)).await;

    let err = w.client.send_message(b"late", &cancel).await.unwrap_err();
    assert!(matches!(err, AgentError::Session(SessionError::Expired)));
    assert!(w.client_store.get_by_key_id(&key_id).is_none());
}

#[tokio::test]
async fn unknown_peer_fails_resolution() {
    let registry = Arc::new(InMemoryRegistry::with_defaults(Chain::Ethereum, 1));
    let resolver: Arc<dyn Resolver> = Arc::new(RegistryResolver::new(registry.clone()));
    let ghost = party();
    let alice = party();

    struct Nop;
    #[async_trait::async_trait]
    impl RequestHandler for Nop {
        async fn handle(&self, _request: SignedRequest) -> sage_wire::SignedResponse {
            sage_wire::SignedResponse::new(500)
        }
    }
    let transport: Arc<dyn Transport> = Arc::new(LoopbackTransport::spawn(Arc::new(Nop)));

    let mut client = AgentClient::new(
        alice.did.clone(),
        alice.signing,
        ghost.did.clone(),
        resolver,
        transport,
        Arc::new(SessionStore::new()),
        ClientConfig::default(),
    );
    let cancel = CancellationToken::new();
    let err = client.connect(&cancel).await.unwrap_err();
    assert!(matches!(err, AgentError::Identity(DidError::IdentityNotFound(_))));
    assert_eq!(client.state(), ClientState::Fresh);
}

#[tokio::test]
async fn cancelled_handshake_leaves_no_session() {
    let mut w = world(SessionPolicy::default()).await;

    // Cancel between resolution and initialization.
    let cancel = CancellationToken::new();
    w.client.resolve_peer(&cancel).await.unwrap();
    assert_eq!(w.client.state(), ClientState::Resolved);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = w.client.initialize(&cancelled).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Wire(sage_wire::WireError::Cancelled)
    ));
    assert_eq!(w.client.state(), ClientState::Resolved);
    assert!(w.client.session().is_none());
    assert_eq!(w.client_store.len(), 0);
    assert_eq!(w.server_store.len(), 0);

    // The same client can still finish the handshake afterwards.
    let cancel = CancellationToken::new();
    let response = w.client.initialize(&cancel).await.unwrap();
    w.client.accept_server_ack(response).await.unwrap();
    assert_eq!(w.client.state(), ClientState::SessionOpen);
}

#[tokio::test]
async fn close_is_terminal_and_clears_store() {
    let mut w = world(SessionPolicy::default()).await;
    let cancel = CancellationToken::new();
    w.client.connect(&cancel).await.unwrap();

    let handle = w.client.session().unwrap();
    let key_id = handle.lock().key_id();

    w.client.close();
    assert_eq!(w.client.state(), ClientState::Closed);
    assert!(w.client_store.get_by_key_id(&key_id).is_none());
    let err = w.client.send_message(b"x", &cancel).await.unwrap_err();
    assert!(matches!(err, AgentError::BadState(_)));
}
