//! Agent records and key bindings — the ledger's data model.
//!
//! The owner↔record↔key relationship is a labelled graph (revoking a
//! key deactivates records; records hold key hashes). It is represented
//! as flat tables keyed by stable identifiers — agent id, key hash,
//! owner address — never as direct cross-object ownership.

use serde::{Deserialize, Serialize};

use sage_crypto::hash::keccak256;
use sage_crypto::keys::KeyKind;

use crate::error::RegistryError;

/// keccak-256 of the canonical DID string.
pub type AgentId = [u8; 32];

/// 20-byte chain address.
pub type Address = [u8; 20];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Registered but not yet proven/approved.
    Pending,
    /// Ownership proof checked (ECDSA) or hook-approved (Ed25519/X25519).
    Verified,
    /// Invalidated forever.
    Revoked,
}

/// One registered key. `bytes` is the family's public encoding; `proof`
/// is the ownership evidence submitted at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentKey {
    pub kind: KeyKind,
    #[serde(with = "serde_bytes_b64")]
    pub bytes: Vec<u8>,
    #[serde(with = "serde_bytes_b64")]
    pub proof: Vec<u8>,
    pub registered_at: u64,
    pub status: KeyStatus,
}

impl AgentKey {
    pub fn hash(&self) -> [u8; 32] {
        keccak256(&self.bytes)
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        self.kind.validate(&self.bytes)?;
        Ok(())
    }
}

/// The on-ledger agent record. Never deleted — deactivation flips
/// `active` and the row stays as audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub did: String,
    pub owner: Address,
    pub name: String,
    pub description: String,
    pub endpoint: String,
    pub capabilities: String,
    pub key_hashes: Vec<[u8; 32]>,
    pub chain_id: u64,
    pub registered_at: u64,
    pub updated_at: u64,
    pub active: bool,
    /// Incremented on every metadata update (replay defence for
    /// off-chain mirrors).
    pub meta_nonce: u64,
}

/// Reveal-phase parameters. Field set and order are normative — the
/// commit hash binds `did`, `keys`, `owner`, `salt`, `chain_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationParams {
    pub did: String,
    pub name: String,
    pub description: String,
    pub endpoint: String,
    pub capabilities: String,
    pub keys: Vec<Vec<u8>>,
    pub key_types: Vec<KeyKind>,
    pub signatures: Vec<Vec<u8>>,
}

impl RegistrationParams {
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.keys.is_empty() {
            return Err(RegistryError::InvalidInput("keys must be non-empty".into()));
        }
        if self.keys.len() != self.key_types.len() || self.keys.len() != self.signatures.len() {
            return Err(RegistryError::InvalidInput(
                "keys, key_types and signatures must have equal length".into(),
            ));
        }
        for (bytes, kind) in self.keys.iter().zip(&self.key_types) {
            kind.validate(bytes)?;
        }
        Ok(())
    }
}

/// Base64 (de)serialisation for opaque byte fields.
mod serde_bytes_b64 {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        URL_SAFE_NO_PAD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_hash_is_keccak_of_bytes() {
        let key = AgentKey {
            kind: KeyKind::Ed25519,
            bytes: vec![1u8; 32],
            proof: vec![],
            registered_at: 0,
            status: KeyStatus::Pending,
        };
        assert_eq!(key.hash(), keccak256(&[1u8; 32]));
    }

    #[test]
    fn params_length_mismatch_rejected() {
        let params = RegistrationParams {
            did: "did:sage:ethereum:0x00a329c0648769a73afac7f9381e08fb43dbea72".into(),
            name: "a".into(),
            description: String::new(),
            endpoint: String::new(),
            capabilities: String::new(),
            keys: vec![vec![1u8; 32]],
            key_types: vec![KeyKind::Ed25519, KeyKind::X25519],
            signatures: vec![vec![]],
        };
        assert!(params.validate().is_err());
    }
}
