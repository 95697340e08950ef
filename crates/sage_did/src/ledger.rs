//! Registry contract surface + in-memory reference chain.
//!
//! `RegistryContract` is the wire-level surface every backend exposes
//! (a JSON-RPC backend lives outside this workspace and is a
//! collaborator, not a member). `InMemoryRegistry` implements the full
//! contract semantics against a manual block clock so the protocol is
//! testable without a node:
//!
//!   - commit–reveal with min/max delay windows and per-day caps
//!   - stake accounting with a 30-day cool-off on deactivation
//!   - ownership proofs (ECDSA on-chain, Ed25519/X25519 via hook)
//!   - key reuse prevention across owners
//!   - revocation cascade: revoking a key deactivates every record
//!     referencing it (hashes stay in the record as audit trail)
//!   - operator delegation for update/addKey/revokeKey
//!   - the §6 event log, agent id first
//!
//! Transactions are serialized — the state sits behind one async mutex,
//! mirroring a chain's sequential execution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use sage_crypto::hash::keccak256;
use sage_crypto::keys::KeyKind;

use crate::commit::{commit_hash, verify_ecdsa_key_proof};
use crate::config::RegistryParams;
use crate::did::{AgentDid, Chain};
use crate::error::RegistryError;
use crate::events::RegistryEvent;
use crate::hooks::{OwnerProofHook, RegistrationHook};
use crate::record::{Address, AgentId, AgentKey, AgentRecord, KeyStatus, RegistrationParams};

// ── Contract surface ─────────────────────────────────────────────────────────

#[async_trait]
pub trait RegistryContract: Send + Sync {
    fn chain_id(&self) -> u64;
    fn registry_address(&self) -> Address;

    /// `commitRegistration(bytes32) payable`
    async fn commit_registration(
        &self,
        from: Address,
        commit: [u8; 32],
        stake: u128,
    ) -> Result<(), RegistryError>;

    /// `registerAgent(RegistrationParams, bytes32)` — the reveal.
    async fn register_agent(
        &self,
        from: Address,
        params: RegistrationParams,
        salt: [u8; 32],
    ) -> Result<AgentId, RegistryError>;

    /// `activateAgent(bytes32)` — callable by anyone once the delay has
    /// elapsed.
    async fn activate_agent(&self, from: Address, agent_id: AgentId) -> Result<(), RegistryError>;

    /// `addKey(bytes32, bytes, uint8, bytes)`
    async fn add_key(
        &self,
        from: Address,
        agent_id: AgentId,
        key_data: Vec<u8>,
        kind: KeyKind,
        signature: Vec<u8>,
    ) -> Result<[u8; 32], RegistryError>;

    /// `revokeKey(bytes32, bytes32)` — irreversible; cascades.
    async fn revoke_key(
        &self,
        from: Address,
        agent_id: AgentId,
        key_hash: [u8; 32],
    ) -> Result<(), RegistryError>;

    /// `updateAgent(bytes32, string, string)`
    async fn update_agent(
        &self,
        from: Address,
        agent_id: AgentId,
        endpoint: String,
        capabilities: String,
    ) -> Result<(), RegistryError>;

    /// `deactivateAgent(bytes32)` — owner only; starts the stake
    /// cool-off.
    async fn deactivate_agent(&self, from: Address, agent_id: AgentId)
        -> Result<(), RegistryError>;

    /// Return the stake once the cool-off has elapsed.
    async fn withdraw_stake(&self, from: Address, agent_id: AgentId)
        -> Result<u128, RegistryError>;

    /// `setApprovalForAgent(bytes32, address, bool)`
    async fn set_approval_for_agent(
        &self,
        from: Address,
        agent_id: AgentId,
        operator: Address,
        approved: bool,
    ) -> Result<(), RegistryError>;

    async fn get_agent(&self, agent_id: AgentId) -> Result<Option<AgentRecord>, RegistryError>;
    async fn get_agent_by_did(&self, did: &str) -> Result<Option<AgentRecord>, RegistryError>;
    async fn get_key(&self, key_hash: [u8; 32]) -> Result<Option<AgentKey>, RegistryError>;
}

// ── In-memory state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Commitment {
    commit_hash: [u8; 32],
    timestamp: u64,
    stake: u128,
    revealed: bool,
}

struct KeyRow {
    key: AgentKey,
    owner: Address,
    /// Every record referencing this hash (same owner by invariant).
    agents: Vec<AgentId>,
}

#[derive(Debug, Clone, Copy)]
struct StakeRow {
    amount: u128,
    refundable_at: Option<u64>,
}

struct LedgerState {
    now: u64,
    commitments: HashMap<Address, Commitment>,
    daily: HashMap<(Address, u64), u32>,
    agents: HashMap<AgentId, AgentRecord>,
    dids: HashMap<String, AgentId>,
    keys: HashMap<[u8; 32], KeyRow>,
    operators: HashMap<AgentId, HashSet<Address>>,
    stakes: HashMap<AgentId, StakeRow>,
    /// agent id → reveal time, cleared on activation.
    pending_activation: HashMap<AgentId, u64>,
    refunds: HashMap<Address, u128>,
    events: Vec<RegistryEvent>,
}

pub struct InMemoryRegistry {
    chain: Chain,
    chain_id: u64,
    address: Address,
    params: RegistryParams,
    hook: Arc<dyn RegistrationHook>,
    state: Mutex<LedgerState>,
}

const GENESIS_TIME: u64 = 1_700_000_000;

impl InMemoryRegistry {
    pub fn new(
        chain: Chain,
        chain_id: u64,
        address: Address,
        params: RegistryParams,
        hook: Arc<dyn RegistrationHook>,
    ) -> Self {
        Self {
            chain,
            chain_id,
            address,
            params,
            hook,
            state: Mutex::new(LedgerState {
                now: GENESIS_TIME,
                commitments: HashMap::new(),
                daily: HashMap::new(),
                agents: HashMap::new(),
                dids: HashMap::new(),
                keys: HashMap::new(),
                operators: HashMap::new(),
                stakes: HashMap::new(),
                pending_activation: HashMap::new(),
                refunds: HashMap::new(),
                events: Vec::new(),
            }),
        }
    }

    /// Registry with default parameters and the owner-proof hook.
    pub fn with_defaults(chain: Chain, chain_id: u64) -> Self {
        let mut address = [0u8; 20];
        address[..4].copy_from_slice(b"sage");
        address[19] = chain_id as u8;
        let hook = Arc::new(OwnerProofHook::new(chain_id, address));
        Self::new(chain, chain_id, address, RegistryParams::default(), hook)
    }

    pub fn params(&self) -> &RegistryParams {
        &self.params
    }

    // ── Block clock (tests drive this) ───────────────────────────────

    pub async fn advance_time(&self, secs: u64) {
        self.state.lock().await.now += secs;
    }

    pub async fn set_time(&self, t: u64) {
        self.state.lock().await.now = t;
    }

    pub async fn block_time(&self) -> u64 {
        self.state.lock().await.now
    }

    // ── Introspection ────────────────────────────────────────────────

    pub async fn events(&self) -> Vec<RegistryEvent> {
        self.state.lock().await.events.clone()
    }

    pub async fn refund_balance(&self, addr: Address) -> u128 {
        self.state
            .lock()
            .await
            .refunds
            .get(&addr)
            .copied()
            .unwrap_or(0)
    }

    fn authorize(
        state: &LedgerState,
        agent_id: AgentId,
        caller: Address,
        owner: Address,
    ) -> Result<(), RegistryError> {
        if caller == owner {
            return Ok(());
        }
        if state
            .operators
            .get(&agent_id)
            .map(|ops| ops.contains(&caller))
            .unwrap_or(false)
        {
            return Ok(());
        }
        Err(RegistryError::Unauthorized)
    }

    /// Check key reuse/revocation rules for binding `hash` to `owner`.
    fn check_key_binding(
        state: &LedgerState,
        hash: &[u8; 32],
        owner: Address,
    ) -> Result<(), RegistryError> {
        if let Some(row) = state.keys.get(hash) {
            if row.key.status == KeyStatus::Revoked {
                return Err(RegistryError::KeyRevoked);
            }
            if row.owner != owner {
                return Err(RegistryError::KeyInUse);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryContract for InMemoryRegistry {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn registry_address(&self) -> Address {
        self.address
    }

    async fn commit_registration(
        &self,
        from: Address,
        commit: [u8; 32],
        stake: u128,
    ) -> Result<(), RegistryError> {
        let mut st = self.state.lock().await;
        let now = st.now;

        if stake < self.params.registration_stake {
            return Err(RegistryError::StakeInsufficient {
                required: self.params.registration_stake,
                provided: stake,
            });
        }

        let day = now / 86_400;
        let count = st.daily.get(&(from, day)).copied().unwrap_or(0);
        if count >= self.params.max_daily_registrations {
            return Err(RegistryError::RateLimitExceeded);
        }

        if let Some(existing) = st.commitments.get(&from).copied() {
            let expired = now > existing.timestamp + self.params.commit_max_delay;
            if !existing.revealed && !expired {
                return Err(RegistryError::InvalidInput(
                    "a commitment is already pending for this owner".into(),
                ));
            }
            if !existing.revealed && expired {
                // Expired unrevealed slot: stake goes back to the owner.
                *st.refunds.entry(from).or_default() += existing.stake;
            }
        }

        st.commitments.insert(
            from,
            Commitment {
                commit_hash: commit,
                timestamp: now,
                stake,
                revealed: false,
            },
        );
        st.daily.insert((from, day), count + 1);
        st.events.push(RegistryEvent::CommitmentRecorded {
            owner: from,
            commit_hash: commit,
            at: now,
        });
        Ok(())
    }

    async fn register_agent(
        &self,
        from: Address,
        params: RegistrationParams,
        salt: [u8; 32],
    ) -> Result<AgentId, RegistryError> {
        let mut st = self.state.lock().await;
        let now = st.now;

        params.validate()?;

        // ── Commitment window ────────────────────────────────────────
        let commitment = st
            .commitments
            .get(&from)
            .copied()
            .ok_or(RegistryError::CommitmentMissing)?;
        if commitment.revealed {
            return Err(RegistryError::CommitmentAlreadyRevealed);
        }
        if now < commitment.timestamp + self.params.commit_min_delay {
            return Err(RegistryError::RevealTooSoon);
        }
        if now > commitment.timestamp + self.params.commit_max_delay {
            return Err(RegistryError::RevealTooLate);
        }

        // ── Hash binding ─────────────────────────────────────────────
        let expected = commit_hash(&params.did, &params.keys, &from, &salt, self.chain_id);
        if expected != commitment.commit_hash {
            return Err(RegistryError::CommitmentMismatch);
        }

        // ── DID rules ────────────────────────────────────────────────
        AgentDid::validate_contract_form(&params.did)
            .map_err(|e| RegistryError::InvalidInput(e.to_string()))?;
        let did: AgentDid = params
            .did
            .parse()
            .map_err(|e| RegistryError::InvalidInput(format!("{e}")))?;
        if did.chain != self.chain {
            return Err(RegistryError::InvalidInput(format!(
                "DID chain {} does not match registry chain {}",
                did.chain, self.chain
            )));
        }
        if did.address != from {
            return Err(RegistryError::InvalidInput(
                "DID address segment must equal the revealing owner".into(),
            ));
        }
        let canonical = did.canonical();
        let agent_id = did.agent_id();
        if st.dids.contains_key(&canonical) {
            return Err(RegistryError::DidAlreadyRegistered);
        }

        // ── Keys ─────────────────────────────────────────────────────
        if params.keys.len() > self.params.max_keys_per_agent {
            return Err(RegistryError::KeyCapReached);
        }
        let mut built: Vec<AgentKey> = Vec::with_capacity(params.keys.len());
        for ((bytes, kind), proof) in params
            .keys
            .iter()
            .zip(&params.key_types)
            .zip(&params.signatures)
        {
            let hash = keccak256(bytes);
            Self::check_key_binding(&st, &hash, from)?;

            let status = match kind {
                KeyKind::EcdsaSecp256k1 => {
                    verify_ecdsa_key_proof(bytes, proof, self.chain_id, &self.address, &from)?;
                    KeyStatus::Verified
                }
                // Decided below by the hook.
                KeyKind::Ed25519 | KeyKind::X25519 => KeyStatus::Pending,
            };
            built.push(AgentKey {
                kind: *kind,
                bytes: bytes.clone(),
                proof: proof.clone(),
                registered_at: now,
                status,
            });
        }

        for key in &mut built {
            if key.status == KeyStatus::Pending
                && self.hook.approve_key(&canonical, from, key).await
            {
                key.status = KeyStatus::Verified;
            }
        }

        // ── Before-hook (fatal on rejection) ─────────────────────────
        self.hook
            .before_register(&canonical, from, &built)
            .await
            .map_err(RegistryError::HookRejected)?;

        // ── Materialize ──────────────────────────────────────────────
        let key_hashes: Vec<[u8; 32]> = built.iter().map(|k| k.hash()).collect();
        for key in built {
            let hash = key.hash();
            st.keys
                .entry(hash)
                .or_insert_with(|| KeyRow {
                    key,
                    owner: from,
                    agents: Vec::new(),
                })
                .agents
                .push(agent_id);
        }

        let record = AgentRecord {
            agent_id,
            did: canonical.clone(),
            owner: from,
            name: params.name,
            description: params.description,
            endpoint: params.endpoint,
            capabilities: params.capabilities,
            key_hashes,
            chain_id: self.chain_id,
            registered_at: now,
            updated_at: now,
            active: false,
            meta_nonce: 0,
        };
        st.agents.insert(agent_id, record);
        st.dids.insert(canonical.clone(), agent_id);
        st.pending_activation.insert(agent_id, now);
        st.stakes.insert(
            agent_id,
            StakeRow {
                amount: commitment.stake,
                refundable_at: None,
            },
        );
        if let Some(slot) = st.commitments.get_mut(&from) {
            slot.revealed = true;
        }
        st.events.push(RegistryEvent::AgentRegistered {
            agent_id,
            did: canonical.clone(),
            owner: from,
            at: now,
        });
        drop(st);

        // After-hook is telemetry only; it cannot fail the registration.
        self.hook.after_register(agent_id, &canonical).await;
        Ok(agent_id)
    }

    async fn activate_agent(&self, _from: Address, agent_id: AgentId) -> Result<(), RegistryError> {
        let mut st = self.state.lock().await;
        let now = st.now;
        if !st.agents.contains_key(&agent_id) {
            return Err(RegistryError::IdentityNotFound);
        }
        let revealed_at = st
            .pending_activation
            .get(&agent_id)
            .copied()
            .ok_or_else(|| RegistryError::InvalidInput("agent is not awaiting activation".into()))?;
        if now < revealed_at + self.params.activation_delay {
            return Err(RegistryError::ActivationTooSoon);
        }
        st.pending_activation.remove(&agent_id);
        let record = st.agents.get_mut(&agent_id).expect("checked above");
        record.active = true;
        record.updated_at = now;
        st.events
            .push(RegistryEvent::AgentActivated { agent_id, at: now });
        Ok(())
    }

    async fn add_key(
        &self,
        from: Address,
        agent_id: AgentId,
        key_data: Vec<u8>,
        kind: KeyKind,
        signature: Vec<u8>,
    ) -> Result<[u8; 32], RegistryError> {
        let mut st = self.state.lock().await;
        let now = st.now;

        let (owner, did, key_count) = {
            let record = st
                .agents
                .get(&agent_id)
                .ok_or(RegistryError::IdentityNotFound)?;
            (record.owner, record.did.clone(), record.key_hashes.len())
        };
        Self::authorize(&st, agent_id, from, owner)?;

        if key_count >= self.params.max_keys_per_agent {
            return Err(RegistryError::KeyCapReached);
        }
        kind.validate(&key_data)?;
        let hash = keccak256(&key_data);
        Self::check_key_binding(&st, &hash, owner)?;
        if st
            .agents
            .get(&agent_id)
            .map(|r| r.key_hashes.contains(&hash))
            .unwrap_or(false)
        {
            return Err(RegistryError::InvalidInput(
                "key already bound to this agent".into(),
            ));
        }

        let mut key = AgentKey {
            kind,
            bytes: key_data,
            proof: signature,
            registered_at: now,
            status: KeyStatus::Pending,
        };
        match kind {
            KeyKind::EcdsaSecp256k1 => {
                verify_ecdsa_key_proof(&key.bytes, &key.proof, self.chain_id, &self.address, &owner)?;
                key.status = KeyStatus::Verified;
            }
            KeyKind::Ed25519 | KeyKind::X25519 => {
                if self.hook.approve_key(&did, owner, &key).await {
                    key.status = KeyStatus::Verified;
                }
            }
        }

        st.keys
            .entry(hash)
            .or_insert_with(|| KeyRow {
                key,
                owner,
                agents: Vec::new(),
            })
            .agents
            .push(agent_id);
        let record = st.agents.get_mut(&agent_id).expect("checked above");
        record.key_hashes.push(hash);
        record.updated_at = now;
        st.events.push(RegistryEvent::KeyAdded {
            agent_id,
            key_hash: hash,
            at: now,
        });
        Ok(hash)
    }

    async fn revoke_key(
        &self,
        from: Address,
        agent_id: AgentId,
        key_hash: [u8; 32],
    ) -> Result<(), RegistryError> {
        let mut st = self.state.lock().await;
        let now = st.now;

        let owner = {
            let record = st
                .agents
                .get(&agent_id)
                .ok_or(RegistryError::IdentityNotFound)?;
            if !record.key_hashes.contains(&key_hash) {
                return Err(RegistryError::InvalidInput(
                    "key not bound to this agent".into(),
                ));
            }
            record.owner
        };
        Self::authorize(&st, agent_id, from, owner)?;

        let affected = {
            let row = st
                .keys
                .get_mut(&key_hash)
                .ok_or_else(|| RegistryError::InvalidInput("unknown key hash".into()))?;
            if row.owner != owner {
                return Err(RegistryError::Unauthorized);
            }
            if row.key.status == KeyStatus::Revoked {
                return Err(RegistryError::KeyRevoked);
            }
            row.key.status = KeyStatus::Revoked;
            row.agents.clone()
        };

        // Cascade: every record referencing the hash goes inactive in
        // the same transaction. Hashes stay in the records (audit).
        for id in affected {
            if let Some(record) = st.agents.get_mut(&id) {
                if record.active {
                    record.active = false;
                    record.updated_at = now;
                    st.events
                        .push(RegistryEvent::AgentDeactivated { agent_id: id, at: now });
                }
            }
            st.pending_activation.remove(&id);
        }
        st.events.push(RegistryEvent::KeyRevoked {
            agent_id,
            key_hash,
            at: now,
        });
        Ok(())
    }

    async fn update_agent(
        &self,
        from: Address,
        agent_id: AgentId,
        endpoint: String,
        capabilities: String,
    ) -> Result<(), RegistryError> {
        let mut st = self.state.lock().await;
        let now = st.now;
        let owner = st
            .agents
            .get(&agent_id)
            .map(|r| r.owner)
            .ok_or(RegistryError::IdentityNotFound)?;
        Self::authorize(&st, agent_id, from, owner)?;

        let record = st.agents.get_mut(&agent_id).expect("checked above");
        record.endpoint = endpoint;
        record.capabilities = capabilities;
        record.meta_nonce += 1;
        record.updated_at = now;
        let meta_nonce = record.meta_nonce;
        st.events.push(RegistryEvent::AgentUpdated {
            agent_id,
            meta_nonce,
            at: now,
        });
        Ok(())
    }

    async fn deactivate_agent(
        &self,
        from: Address,
        agent_id: AgentId,
    ) -> Result<(), RegistryError> {
        let mut st = self.state.lock().await;
        let now = st.now;
        let owner = st
            .agents
            .get(&agent_id)
            .map(|r| r.owner)
            .ok_or(RegistryError::IdentityNotFound)?;
        if from != owner {
            return Err(RegistryError::Unauthorized);
        }

        let record = st.agents.get_mut(&agent_id).expect("checked above");
        record.active = false;
        record.updated_at = now;
        st.pending_activation.remove(&agent_id);
        let cooloff = self.params.stake_cooloff;
        if let Some(stake) = st.stakes.get_mut(&agent_id) {
            stake.refundable_at = Some(now + cooloff);
        }
        st.events
            .push(RegistryEvent::AgentDeactivated { agent_id, at: now });
        Ok(())
    }

    async fn withdraw_stake(
        &self,
        from: Address,
        agent_id: AgentId,
    ) -> Result<u128, RegistryError> {
        let mut st = self.state.lock().await;
        let now = st.now;
        let owner = st
            .agents
            .get(&agent_id)
            .map(|r| r.owner)
            .ok_or(RegistryError::IdentityNotFound)?;
        if from != owner {
            return Err(RegistryError::Unauthorized);
        }
        let stake = st
            .stakes
            .get(&agent_id)
            .copied()
            .ok_or(RegistryError::StakeLocked)?;
        match stake.refundable_at {
            Some(t) if now >= t => {
                st.stakes.remove(&agent_id);
                *st.refunds.entry(from).or_default() += stake.amount;
                Ok(stake.amount)
            }
            _ => Err(RegistryError::StakeLocked),
        }
    }

    async fn set_approval_for_agent(
        &self,
        from: Address,
        agent_id: AgentId,
        operator: Address,
        approved: bool,
    ) -> Result<(), RegistryError> {
        let mut st = self.state.lock().await;
        let owner = st
            .agents
            .get(&agent_id)
            .map(|r| r.owner)
            .ok_or(RegistryError::IdentityNotFound)?;
        if from != owner {
            return Err(RegistryError::Unauthorized);
        }
        let ops = st.operators.entry(agent_id).or_default();
        if approved {
            ops.insert(operator);
        } else {
            ops.remove(&operator);
        }
        st.events.push(RegistryEvent::ApprovalForAgent {
            agent_id,
            operator,
            approved,
        });
        Ok(())
    }

    async fn get_agent(&self, agent_id: AgentId) -> Result<Option<AgentRecord>, RegistryError> {
        Ok(self.state.lock().await.agents.get(&agent_id).cloned())
    }

    async fn get_agent_by_did(&self, did: &str) -> Result<Option<AgentRecord>, RegistryError> {
        let parsed: AgentDid = did
            .parse()
            .map_err(|e| RegistryError::InvalidInput(format!("{e}")))?;
        let st = self.state.lock().await;
        Ok(st
            .dids
            .get(&parsed.canonical())
            .and_then(|id| st.agents.get(id))
            .cloned())
    }

    async fn get_key(&self, key_hash: [u8; 32]) -> Result<Option<AgentKey>, RegistryError> {
        Ok(self
            .state
            .lock()
            .await
            .keys
            .get(&key_hash)
            .map(|row| row.key.clone()))
    }
}
