//! End-to-end registry protocol tests against the in-memory chain.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sage_crypto::ed25519::Ed25519KeyPair;
use sage_crypto::keys::KeyPair;
use sage_crypto::ecdsa::EcdsaKeyPair;
use sage_crypto::x25519::KemKeyPair;

use sage_did::commit::commit_hash;
use sage_did::config::RegistryParams;
use sage_did::error::{DidError, RegistryError};
use sage_did::events::RegistryEvent;
use sage_did::hooks::OwnerProofHook;
use sage_did::ledger::{InMemoryRegistry, RegistryContract};
use sage_did::registry::{RegistrationRequest, RegistryClient};
use sage_did::resolver::{CachingResolver, MultiChainResolver, RegistryResolver, Resolver};
use sage_did::{AgentDid, Chain, KeyStatus};

struct Party {
    owner: EcdsaKeyPair,
    signing: Ed25519KeyPair,
    kem: KemKeyPair,
    did: AgentDid,
}

fn party(chain: Chain, nonce: Option<u64>) -> Party {
    let owner = EcdsaKeyPair::generate().unwrap();
    let signing = Ed25519KeyPair::generate().unwrap();
    let kem = KemKeyPair::generate().unwrap();
    let address = owner.address().unwrap();
    let did = match nonce {
        Some(n) => AgentDid::with_nonce(chain, address, n),
        None => AgentDid::new(chain, address),
    };
    Party {
        owner,
        signing,
        kem,
        did,
    }
}

fn request(client: &RegistryClient, p: &Party) -> RegistrationRequest {
    client
        .prepare_registration(
            &p.owner,
            &p.did,
            "test-agent",
            "an agent",
            "https://agent.example",
            r#"{"chat":true}"#,
            &p.signing,
            &p.kem,
        )
        .unwrap()
}

fn default_registry() -> Arc<InMemoryRegistry> {
    Arc::new(InMemoryRegistry::with_defaults(Chain::Ethereum, 1))
}

/// Full commit → reveal → activate flow for one party.
async fn register(
    registry: &Arc<InMemoryRegistry>,
    client: &RegistryClient,
    p: &Party,
) -> sage_did::AgentId {
    let cancel = CancellationToken::new();
    let req = request(client, p);
    let stake = registry.params().registration_stake;
    client.commit(&req, stake, &cancel).await.unwrap();
    registry.advance_time(61).await;
    let agent_id = client.reveal(&req, &cancel).await.unwrap();
    registry.advance_time(3_600).await;
    client
        .activate(req.owner, agent_id, &cancel)
        .await
        .unwrap();
    agent_id
}

#[tokio::test]
async fn commit_then_reveal_happy_path_and_timing_windows() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let p = party(Chain::Ethereum, None);
    let req = request(&client, &p);
    let stake = registry.params().registration_stake;

    client.commit(&req, stake, &cancel).await.unwrap();

    // t+59: too soon.
    registry.advance_time(59).await;
    assert!(matches!(
        client.reveal(&req, &cancel).await,
        Err(RegistryError::RevealTooSoon)
    ));

    // t+61: accepted.
    registry.advance_time(2).await;
    let agent_id = client.reveal(&req, &cancel).await.unwrap();

    // A second reveal of the same slot is refused.
    assert!(matches!(
        client.reveal(&req, &cancel).await,
        Err(RegistryError::CommitmentAlreadyRevealed)
    ));

    // Activation gated by the delay.
    assert!(matches!(
        client.activate(req.owner, agent_id, &cancel).await,
        Err(RegistryError::ActivationTooSoon)
    ));
    registry.advance_time(3_600).await;
    client.activate(req.owner, agent_id, &cancel).await.unwrap();

    let record = registry.get_agent(agent_id).await.unwrap().unwrap();
    assert!(record.active);
    assert_eq!(record.did, p.did.canonical());
    assert_eq!(record.key_hashes.len(), 3);
}

#[tokio::test]
async fn reveal_after_window_fails_too_late() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let p = party(Chain::Ethereum, None);
    let req = request(&client, &p);
    let stake = registry.params().registration_stake;

    client.commit(&req, stake, &cancel).await.unwrap();
    registry.advance_time(3_601).await;
    assert!(matches!(
        client.reveal(&req, &cancel).await,
        Err(RegistryError::RevealTooLate)
    ));

    // The expired slot is reusable; the old stake is refunded.
    client.commit(&req, stake, &cancel).await.unwrap();
    assert_eq!(registry.refund_balance(req.owner).await, stake);
    registry.advance_time(61).await;
    client.reveal(&req, &cancel).await.unwrap();
}

#[tokio::test]
async fn reveal_without_commit_and_wrong_salt() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let p = party(Chain::Ethereum, None);
    let mut req = request(&client, &p);
    let stake = registry.params().registration_stake;

    assert!(matches!(
        client.reveal(&req, &cancel).await,
        Err(RegistryError::CommitmentMissing)
    ));

    client.commit(&req, stake, &cancel).await.unwrap();
    registry.advance_time(61).await;
    req.salt[0] ^= 1;
    assert!(matches!(
        client.reveal(&req, &cancel).await,
        Err(RegistryError::CommitmentMismatch)
    ));
}

#[tokio::test]
async fn insufficient_stake_rejected() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let p = party(Chain::Ethereum, None);
    let req = request(&client, &p);
    let stake = registry.params().registration_stake;

    assert!(matches!(
        client.commit(&req, stake - 1, &cancel).await,
        Err(RegistryError::StakeInsufficient { .. })
    ));
}

#[tokio::test]
async fn daily_commit_cap_enforced() {
    let params = RegistryParams {
        max_daily_registrations: 2,
        ..RegistryParams::default()
    };
    let mut address = [0u8; 20];
    address[0] = 0xAA;
    let hook = Arc::new(OwnerProofHook::new(1, address));
    let registry = Arc::new(InMemoryRegistry::new(
        Chain::Ethereum,
        1,
        address,
        params,
        hook,
    ));
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let stake = registry.params().registration_stake;

    let owner = EcdsaKeyPair::generate().unwrap();
    let signing = Ed25519KeyPair::generate().unwrap();
    let kem = KemKeyPair::generate().unwrap();
    let address20 = owner.address().unwrap();

    for nonce in 0..2u64 {
        let p = Party {
            owner: EcdsaKeyPair::from_secret_bytes(owner.secret_bytes()).unwrap(),
            signing: Ed25519KeyPair::from_secret_bytes(signing.secret_bytes()).unwrap(),
            kem: KemKeyPair::from_secret_bytes(kem.secret_bytes()).unwrap(),
            did: AgentDid::with_nonce(Chain::Ethereum, address20, nonce + 1),
        };
        let req = request(&client, &p);
        client.commit(&req, stake, &cancel).await.unwrap();
        registry.advance_time(61).await;
        client.reveal(&req, &cancel).await.unwrap();
    }

    let p = Party {
        owner,
        signing,
        kem,
        did: AgentDid::with_nonce(Chain::Ethereum, address20, 9),
    };
    let req = request(&client, &p);
    assert!(matches!(
        client.commit(&req, stake, &cancel).await,
        Err(RegistryError::RateLimitExceeded)
    ));
}

#[tokio::test]
async fn cross_chain_challenge_rejected() {
    // Proofs produced for chainId=1, presented to a registry on
    // chainId=11155111: the commit hash is recomputed for the target
    // chain so the reveal reaches proof verification — and fails there.
    let registry_1 = default_registry();
    let client_1 = RegistryClient::new(registry_1.clone());
    let p = party(Chain::Ethereum, None);
    let req = request(&client_1, &p);

    let registry_sepolia = Arc::new(InMemoryRegistry::with_defaults(Chain::Ethereum, 11_155_111));
    let client = RegistryClient::new(registry_sepolia.clone());
    let cancel = CancellationToken::new();
    let stake = registry_sepolia.params().registration_stake;

    let foreign_commit = commit_hash(
        &req.params.did,
        &req.params.keys,
        &req.owner,
        &req.salt,
        11_155_111,
    );
    registry_sepolia
        .commit_registration(req.owner, foreign_commit, stake)
        .await
        .unwrap();
    registry_sepolia.advance_time(61).await;
    let err = client.reveal(&req, &cancel).await.unwrap_err();
    assert!(
        matches!(err, RegistryError::SignatureInvalid(_)),
        "expected SignatureInvalid, got {err:?}"
    );
}

#[tokio::test]
async fn key_reuse_across_owners_rejected() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let stake = registry.params().registration_stake;

    let alice = party(Chain::Ethereum, None);
    register(&registry, &client, &alice).await;

    // Bob tries to register Alice's Ed25519 key as his own.
    let bob = party(Chain::Ethereum, None);
    let mut req = request(&client, &bob);
    req.params.keys[1] = alice.signing.public().0.clone();
    req.commit = commit_hash(
        &req.params.did,
        &req.params.keys,
        &req.owner,
        &req.salt,
        registry.chain_id(),
    );
    client.commit(&req, stake, &cancel).await.unwrap();
    registry.advance_time(61).await;
    assert!(matches!(
        client.reveal(&req, &cancel).await,
        Err(RegistryError::KeyInUse)
    ));
}

#[tokio::test]
async fn revocation_cascades_to_all_referencing_records() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let p = party(Chain::Ethereum, None);
    let agent_id = register(&registry, &client, &p).await;

    let record = registry.get_agent(agent_id).await.unwrap().unwrap();
    let ed_hash = record.key_hashes[1];

    client
        .revoke_key(p.did.address, agent_id, ed_hash, &cancel)
        .await
        .unwrap();

    // Key gone, record inactive, hash kept as audit trail.
    let key = registry.get_key(ed_hash).await.unwrap().unwrap();
    assert_eq!(key.status, KeyStatus::Revoked);
    let record = registry.get_agent(agent_id).await.unwrap().unwrap();
    assert!(!record.active);
    assert!(record.key_hashes.contains(&ed_hash));

    let events = registry.events().await;
    assert!(events
        .iter()
        .any(|e| matches!(e, RegistryEvent::KeyRevoked { agent_id: id, .. } if *id == agent_id)));
    assert!(events
        .iter()
        .any(|e| matches!(e, RegistryEvent::AgentDeactivated { agent_id: id, .. } if *id == agent_id)));

    // Revoked keys can never be re-registered by anyone.
    let again = registry
        .add_key(
            p.did.address,
            agent_id,
            key.bytes.clone(),
            key.kind,
            vec![0u8; 65],
        )
        .await;
    assert!(matches!(again, Err(RegistryError::KeyRevoked)));
}

#[tokio::test]
async fn operator_delegation() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let p = party(Chain::Ethereum, None);
    let agent_id = register(&registry, &client, &p).await;

    let operator = [7u8; 20];
    let stranger = [8u8; 20];

    assert!(matches!(
        client
            .update_agent(
                operator,
                agent_id,
                "https://new.example".into(),
                String::new(),
                &cancel
            )
            .await,
        Err(RegistryError::Unauthorized)
    ));

    client
        .set_approval(p.did.address, agent_id, operator, true, &cancel)
        .await
        .unwrap();
    client
        .update_agent(
            operator,
            agent_id,
            "https://new.example".into(),
            r#"{"chat":true,"search":true}"#.into(),
            &cancel,
        )
        .await
        .unwrap();

    let record = registry.get_agent(agent_id).await.unwrap().unwrap();
    assert_eq!(record.endpoint, "https://new.example");
    assert_eq!(record.meta_nonce, 1);

    assert!(matches!(
        client
            .update_agent(stranger, agent_id, String::new(), String::new(), &cancel)
            .await,
        Err(RegistryError::Unauthorized)
    ));
}

#[tokio::test]
async fn stake_returned_after_cooloff() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let p = party(Chain::Ethereum, None);
    let agent_id = register(&registry, &client, &p).await;
    let stake = registry.params().registration_stake;

    client
        .deactivate_agent(p.did.address, agent_id, &cancel)
        .await
        .unwrap();
    assert!(matches!(
        registry.withdraw_stake(p.did.address, agent_id).await,
        Err(RegistryError::StakeLocked)
    ));
    registry.advance_time(30 * 86_400).await;
    assert_eq!(
        registry
            .withdraw_stake(p.did.address, agent_id)
            .await
            .unwrap(),
        stake
    );
}

#[tokio::test]
async fn resolution_verifies_activity_and_keys() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let p = party(Chain::Ethereum, None);
    let agent_id = register(&registry, &client, &p).await;

    let resolver = RegistryResolver::new(registry.clone());
    let resolved = resolver.resolve(&p.did, &cancel).await.unwrap();
    assert_eq!(resolved.signing_key.0, p.signing.public().0);
    assert_eq!(resolved.kem_key.0, p.kem.public().0);

    // Unknown DID.
    let ghost = party(Chain::Ethereum, None);
    assert!(matches!(
        resolver.resolve(&ghost.did, &cancel).await,
        Err(DidError::IdentityNotFound(_))
    ));

    // Deactivated agents do not resolve.
    client
        .deactivate_agent(p.did.address, agent_id, &cancel)
        .await
        .unwrap();
    assert!(matches!(
        resolver.resolve(&p.did, &cancel).await,
        Err(DidError::IdentityInactive(_))
    ));
}

#[tokio::test]
async fn caching_resolver_serves_within_ttl_and_evicts() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let cancel = CancellationToken::new();
    let p = party(Chain::Ethereum, None);
    let agent_id = register(&registry, &client, &p).await;

    let resolver = CachingResolver::new(
        Arc::new(RegistryResolver::new(registry.clone())),
        Duration::from_secs(60),
    );
    resolver.resolve(&p.did, &cancel).await.unwrap();

    // Ledger-side deactivation is invisible until eviction — the cache
    // is advisory.
    client
        .deactivate_agent(p.did.address, agent_id, &cancel)
        .await
        .unwrap();
    assert!(resolver.resolve(&p.did, &cancel).await.is_ok());
    resolver.evict(&p.did);
    assert!(matches!(
        resolver.resolve(&p.did, &cancel).await,
        Err(DidError::IdentityInactive(_))
    ));
}

#[tokio::test]
async fn multichain_dispatch() {
    let eth = default_registry();
    let client = RegistryClient::new(eth.clone());
    let cancel = CancellationToken::new();
    let p = party(Chain::Ethereum, None);
    register(&eth, &client, &p).await;

    let router = MultiChainResolver::new()
        .with_chain(Chain::Ethereum, Arc::new(RegistryResolver::new(eth.clone())));
    assert!(router.resolve(&p.did, &cancel).await.is_ok());

    let kaia_party = party(Chain::Kaia, None);
    assert!(matches!(
        router.resolve(&kaia_party.did, &cancel).await,
        Err(DidError::UnsupportedChain(_))
    ));
}

#[tokio::test]
async fn cancelled_reveal_leaves_no_record() {
    let registry = default_registry();
    let client = RegistryClient::new(registry.clone());
    let p = party(Chain::Ethereum, None);
    let req = request(&client, &p);
    let stake = registry.params().registration_stake;

    let cancel = CancellationToken::new();
    client.commit(&req, stake, &cancel).await.unwrap();
    registry.advance_time(61).await;

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(
        client.reveal(&req, &cancelled).await,
        Err(RegistryError::Cancelled)
    ));
    assert!(registry
        .get_agent_by_did(&p.did.canonical())
        .await
        .unwrap()
        .is_none());
}
