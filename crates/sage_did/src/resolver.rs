//! Verified DID resolution.
//!
//! A resolver turns a DID into the agent record plus its canonical
//! signing (Ed25519) and KEM (X25519) keys. On every resolution it MUST
//! check that the record is active and that the queried DID matches the
//! record's DID field — a registry answering for the wrong name is an
//! attack, not a cache quirk.
//!
//! `CachingResolver` adds a bounded-TTL cache; concurrent resolves for
//! the same DID are coalesced behind a per-DID async lock so a cold
//! cache does not produce a thundering herd. Cached entries are
//! advisory only — revocation is authoritative on the ledger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use sage_crypto::keys::{KeyKind, PublicKeyBytes};

use crate::did::{AgentDid, Chain};
use crate::error::DidError;
use crate::ledger::RegistryContract;
use crate::record::{AgentRecord, KeyStatus};

/// A record plus the two keys the handshake needs.
#[derive(Debug, Clone)]
pub struct ResolvedAgent {
    pub record: AgentRecord,
    /// Canonical Ed25519 signing key.
    pub signing_key: PublicKeyBytes,
    /// Canonical X25519 KEM key.
    pub kem_key: PublicKeyBytes,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        did: &AgentDid,
        cancel: &CancellationToken,
    ) -> Result<ResolvedAgent, DidError>;
}

// ── Ledger-backed resolver ───────────────────────────────────────────────────

pub struct RegistryResolver {
    contract: Arc<dyn RegistryContract>,
}

impl RegistryResolver {
    pub fn new(contract: Arc<dyn RegistryContract>) -> Self {
        Self { contract }
    }

    fn pick_keys(record: &AgentRecord, keys: &[(KeyKind, KeyStatus, PublicKeyBytes)])
        -> Result<(PublicKeyBytes, PublicKeyBytes), DidError>
    {
        // Prefer verified keys; fall back to pending ones (their proofs
        // are policy-gated, not broken) but never to revoked ones.
        let pick = |kind: KeyKind| {
            keys.iter()
                .filter(|(k, s, _)| *k == kind && *s == KeyStatus::Verified)
                .map(|(_, _, b)| b.clone())
                .next()
                .or_else(|| {
                    keys.iter()
                        .filter(|(k, s, _)| *k == kind && *s == KeyStatus::Pending)
                        .map(|(_, _, b)| b.clone())
                        .next()
                })
        };
        let signing = pick(KeyKind::Ed25519).ok_or(DidError::MissingKey("Ed25519 signing"))?;
        let kem = pick(KeyKind::X25519).ok_or(DidError::MissingKey("X25519 KEM"))?;
        if keys
            .iter()
            .any(|(_, s, _)| *s == KeyStatus::Pending)
        {
            tracing::warn!(did = %record.did, "resolved agent has unapproved pending keys");
        }
        Ok((signing, kem))
    }
}

#[async_trait]
impl Resolver for RegistryResolver {
    async fn resolve(
        &self,
        did: &AgentDid,
        cancel: &CancellationToken,
    ) -> Result<ResolvedAgent, DidError> {
        let canonical = did.canonical();

        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DidError::Cancelled),
            r = self.contract.get_agent_by_did(&canonical) => r?,
        }
        .ok_or_else(|| DidError::IdentityNotFound(canonical.clone()))?;

        // The record must answer for the DID we asked about.
        let record_did: AgentDid = record
            .did
            .parse()
            .map_err(|_| DidError::IdentityNotFound(canonical.clone()))?;
        if !record_did.same_agent(did) {
            return Err(DidError::IdentityNotFound(canonical));
        }
        if !record.active {
            return Err(DidError::IdentityInactive(canonical));
        }

        let mut keys = Vec::with_capacity(record.key_hashes.len());
        for hash in &record.key_hashes {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DidError::Cancelled),
                r = self.contract.get_key(*hash) => r?,
            };
            if let Some(key) = fetched {
                keys.push((key.kind, key.status, PublicKeyBytes(key.bytes)));
            }
        }
        let (signing_key, kem_key) = Self::pick_keys(&record, &keys)?;

        Ok(ResolvedAgent {
            record,
            signing_key,
            kem_key,
        })
    }
}

// ── Caching + coalescing ─────────────────────────────────────────────────────

struct CacheEntry {
    at: Instant,
    agent: ResolvedAgent,
}

pub struct CachingResolver {
    inner: Arc<dyn Resolver>,
    ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
    /// Per-DID guards so concurrent cold lookups collapse to one fetch.
    inflight: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CachingResolver {
    pub fn new(inner: Arc<dyn Resolver>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
            inflight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Drop a cached entry (e.g. after seeing a revocation event).
    pub fn evict(&self, did: &AgentDid) {
        self.cache.write().remove(&did.canonical());
    }

    fn cached(&self, key: &str) -> Option<ResolvedAgent> {
        let cache = self.cache.read();
        cache
            .get(key)
            .filter(|e| e.at.elapsed() < self.ttl)
            .map(|e| e.agent.clone())
    }
}

#[async_trait]
impl Resolver for CachingResolver {
    async fn resolve(
        &self,
        did: &AgentDid,
        cancel: &CancellationToken,
    ) -> Result<ResolvedAgent, DidError> {
        let key = did.canonical();

        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let guard = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(key.clone()).or_default().clone()
        };
        let _held = guard.lock().await;

        // A coalesced waiter finds the cache warm by the time it holds
        // the per-DID lock.
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let agent = self.inner.resolve(did, cancel).await?;
        self.cache.write().insert(
            key.clone(),
            CacheEntry {
                at: Instant::now(),
                agent: agent.clone(),
            },
        );
        Ok(agent)
    }
}

// ── Multi-chain dispatch ─────────────────────────────────────────────────────

/// Routes by the chain segment of the DID; each chain adapter
/// implements the same resolver capability.
#[derive(Default)]
pub struct MultiChainResolver {
    routes: HashMap<Chain, Arc<dyn Resolver>>,
}

impl MultiChainResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, chain: Chain, resolver: Arc<dyn Resolver>) -> Self {
        self.routes.insert(chain, resolver);
        self
    }
}

#[async_trait]
impl Resolver for MultiChainResolver {
    async fn resolve(
        &self,
        did: &AgentDid,
        cancel: &CancellationToken,
    ) -> Result<ResolvedAgent, DidError> {
        match self.routes.get(&did.chain) {
            Some(r) => r.resolve(did, cancel).await,
            None => Err(DidError::UnsupportedChain(did.chain.to_string())),
        }
    }
}
