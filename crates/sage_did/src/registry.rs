//! Commit–reveal client over the contract surface.
//!
//! The client builds parameter sets and ownership proofs, computes the
//! commit hash, and drives the two-phase registration. Every ledger
//! call is suspendable and accepts a cancellation token; ledger
//! submissions are NEVER retried here — a replay could become a second
//! transaction.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use sage_crypto::ed25519::Ed25519KeyPair;
use sage_crypto::keys::{KeyKind, KeyPair};
use sage_crypto::ecdsa::EcdsaKeyPair;
use sage_crypto::x25519::KemKeyPair;

use crate::commit::{commit_hash, proof_for_key, random_salt, sign_key_proof};
use crate::did::AgentDid;
use crate::error::RegistryError;
use crate::ledger::RegistryContract;
use crate::record::{Address, AgentId, RegistrationParams};

async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, RegistryError>>,
) -> Result<T, RegistryError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RegistryError::Cancelled),
        res = fut => res,
    }
}

/// Everything needed to run a registration end to end.
pub struct RegistrationRequest {
    pub params: RegistrationParams,
    pub salt: [u8; 32],
    pub commit: [u8; 32],
    pub owner: Address,
}

pub struct RegistryClient {
    contract: Arc<dyn RegistryContract>,
}

impl RegistryClient {
    pub fn new(contract: Arc<dyn RegistryContract>) -> Self {
        Self { contract }
    }

    pub fn contract(&self) -> &Arc<dyn RegistryContract> {
        &self.contract
    }

    /// Assemble reveal parameters for an agent owning one ECDSA chain
    /// key, one Ed25519 signing key and one X25519 KEM key, with
    /// ownership proofs for all three.
    pub fn prepare_registration(
        &self,
        owner_key: &EcdsaKeyPair,
        did: &AgentDid,
        name: &str,
        description: &str,
        endpoint: &str,
        capabilities: &str,
        signing: &Ed25519KeyPair,
        kem: &KemKeyPair,
    ) -> Result<RegistrationRequest, RegistryError> {
        let owner = owner_key.address()?;
        if did.address != owner {
            return Err(RegistryError::InvalidInput(
                "DID address does not match owner key".into(),
            ));
        }
        let chain_id = self.contract.chain_id();
        let registry = self.contract.registry_address();

        let ecdsa_public = owner_key.public_uncompressed()?.to_vec();
        let ed_public = signing.public().0.clone();
        let kem_public = kem.public().0.clone();

        // ECDSA self-proof, owner-signed proofs for the other families.
        let ecdsa_proof = sign_key_proof(owner_key, chain_id, &registry, &owner, &ecdsa_public)?;
        let ed_proof = proof_for_key(owner_key, chain_id, &registry, &ed_public)?;
        let kem_proof = proof_for_key(owner_key, chain_id, &registry, &kem_public)?;

        let params = RegistrationParams {
            did: did.canonical(),
            name: name.to_string(),
            description: description.to_string(),
            endpoint: endpoint.to_string(),
            capabilities: capabilities.to_string(),
            keys: vec![ecdsa_public, ed_public, kem_public],
            key_types: vec![KeyKind::EcdsaSecp256k1, KeyKind::Ed25519, KeyKind::X25519],
            signatures: vec![ecdsa_proof, ed_proof, kem_proof],
        };
        params.validate()?;

        let salt = random_salt();
        let commit = commit_hash(&params.did, &params.keys, &owner, &salt, chain_id);
        Ok(RegistrationRequest {
            params,
            salt,
            commit,
            owner,
        })
    }

    /// Phase 1: submit the commitment with the stake deposit.
    pub async fn commit(
        &self,
        request: &RegistrationRequest,
        stake: u128,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        tracing::debug!(owner = %hex::encode(request.owner), "submitting commitment");
        with_cancel(
            cancel,
            self.contract
                .commit_registration(request.owner, request.commit, stake),
        )
        .await
    }

    /// Phase 2: reveal after the minimum delay.
    pub async fn reveal(
        &self,
        request: &RegistrationRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentId, RegistryError> {
        tracing::debug!(did = %request.params.did, "revealing registration");
        with_cancel(
            cancel,
            self.contract
                .register_agent(request.owner, request.params.clone(), request.salt),
        )
        .await
    }

    /// Phase 3: activate once the activation delay has elapsed.
    pub async fn activate(
        &self,
        caller: Address,
        agent_id: AgentId,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        with_cancel(cancel, self.contract.activate_agent(caller, agent_id)).await
    }

    pub async fn add_key(
        &self,
        from: Address,
        agent_id: AgentId,
        key_data: Vec<u8>,
        kind: KeyKind,
        signature: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<[u8; 32], RegistryError> {
        with_cancel(
            cancel,
            self.contract
                .add_key(from, agent_id, key_data, kind, signature),
        )
        .await
    }

    pub async fn revoke_key(
        &self,
        from: Address,
        agent_id: AgentId,
        key_hash: [u8; 32],
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        with_cancel(cancel, self.contract.revoke_key(from, agent_id, key_hash)).await
    }

    pub async fn update_agent(
        &self,
        from: Address,
        agent_id: AgentId,
        endpoint: String,
        capabilities: String,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        with_cancel(
            cancel,
            self.contract
                .update_agent(from, agent_id, endpoint, capabilities),
        )
        .await
    }

    pub async fn deactivate_agent(
        &self,
        from: Address,
        agent_id: AgentId,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        with_cancel(cancel, self.contract.deactivate_agent(from, agent_id)).await
    }

    pub async fn set_approval(
        &self,
        from: Address,
        agent_id: AgentId,
        operator: Address,
        approved: bool,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        with_cancel(
            cancel,
            self.contract
                .set_approval_for_agent(from, agent_id, operator, approved),
        )
        .await
    }
}
