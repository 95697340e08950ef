//! Registration policy hooks.
//!
//! The registry delegates policy to a caller-supplied capability:
//!   - `before_register` runs ahead of record creation; a rejection is
//!     FATAL to the registration.
//!   - `after_register` is telemetry only; it MUST NOT be able to fail
//!     a registration (the ledger ignores anything it does).
//!   - `approve_key` validates Ed25519/X25519 ownership proofs, which
//!     have no on-chain verifier. Approval is policy, not a
//!     cryptographic guarantee; unapproved keys register as Pending.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::commit::verify_owner_key_proof;
use crate::did::AgentDid;
use crate::record::{Address, AgentId, AgentKey};

#[async_trait]
pub trait RegistrationHook: Send + Sync {
    /// Policy gate ahead of record creation. `Err(reason)` aborts the
    /// registration with `HookRejected`.
    async fn before_register(
        &self,
        did: &str,
        owner: Address,
        keys: &[AgentKey],
    ) -> Result<(), String>;

    /// Post-registration telemetry. Infallible by contract.
    async fn after_register(&self, agent_id: AgentId, did: &str);

    /// Decide whether a non-ECDSA key's proof blob is acceptable.
    async fn approve_key(&self, did: &str, owner: Address, key: &AgentKey) -> bool;
}

/// Reference policy:
///   - DID must parse and its address segment must equal the owner
///   - denylisted DIDs are refused
///   - Ed25519/X25519 proofs must be the owner's signature over the
///     key-registration challenge (the off-chain validation path)
pub struct OwnerProofHook {
    chain_id: u64,
    registry: Address,
    denylist: HashSet<String>,
}

impl OwnerProofHook {
    pub fn new(chain_id: u64, registry: Address) -> Self {
        Self {
            chain_id,
            registry,
            denylist: HashSet::new(),
        }
    }

    pub fn deny(mut self, did: impl Into<String>) -> Self {
        self.denylist.insert(did.into());
        self
    }
}

#[async_trait]
impl RegistrationHook for OwnerProofHook {
    async fn before_register(
        &self,
        did: &str,
        owner: Address,
        _keys: &[AgentKey],
    ) -> Result<(), String> {
        let parsed: AgentDid = did
            .parse()
            .map_err(|e| format!("DID failed syntactic checks: {e}"))?;
        if parsed.address != owner {
            return Err("DID address segment does not match owner".into());
        }
        if self.denylist.contains(&parsed.canonical()) {
            return Err("DID is denylisted".into());
        }
        Ok(())
    }

    async fn after_register(&self, agent_id: AgentId, did: &str) {
        tracing::info!(agent_id = %hex::encode(agent_id), did, "agent registered");
    }

    async fn approve_key(&self, _did: &str, owner: Address, key: &AgentKey) -> bool {
        verify_owner_key_proof(&key.bytes, &key.proof, self.chain_id, &self.registry, &owner)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_crypto::keys::{KeyKind, KeyPair};
    use sage_crypto::ecdsa::EcdsaKeyPair;

    #[tokio::test]
    async fn rejects_owner_mismatch() {
        let hook = OwnerProofHook::new(1, [0u8; 20]);
        let err = hook
            .before_register(
                "did:sage:ethereum:0x00a329c0648769a73afac7f9381e08fb43dbea72",
                [9u8; 20],
                &[],
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn denylist_enforced() {
        let owner_key = EcdsaKeyPair::generate().unwrap();
        let owner = owner_key.address().unwrap();
        let did = AgentDid::new(crate::Chain::Ethereum, owner);
        let hook = OwnerProofHook::new(1, [0u8; 20]).deny(did.canonical());
        assert!(hook
            .before_register(&did.canonical(), owner, &[])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn approves_owner_signed_proof_only() {
        let owner_key = EcdsaKeyPair::generate().unwrap();
        let owner = owner_key.address().unwrap();
        let registry = [3u8; 20];
        let hook = OwnerProofHook::new(1, registry);

        let ed_bytes = vec![5u8; 32];
        let proof =
            crate::commit::sign_key_proof(&owner_key, 1, &registry, &owner, &ed_bytes).unwrap();
        let key = AgentKey {
            kind: KeyKind::Ed25519,
            bytes: ed_bytes.clone(),
            proof,
            registered_at: 0,
            status: crate::KeyStatus::Pending,
        };
        assert!(hook.approve_key("did", owner, &key).await);

        let bogus = AgentKey {
            proof: vec![0u8; 65],
            ..key
        };
        assert!(!hook.approve_key("did", owner, &bogus).await);
    }
}
