//! The registry event set. Every event leads with the agent id (the
//! first indexed topic on-chain) except `CommitmentRecorded`, which
//! precedes any agent's existence.

use serde::{Deserialize, Serialize};

use crate::record::{Address, AgentId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    CommitmentRecorded {
        owner: Address,
        commit_hash: [u8; 32],
        at: u64,
    },
    AgentRegistered {
        agent_id: AgentId,
        did: String,
        owner: Address,
        at: u64,
    },
    AgentActivated {
        agent_id: AgentId,
        at: u64,
    },
    AgentUpdated {
        agent_id: AgentId,
        meta_nonce: u64,
        at: u64,
    },
    AgentDeactivated {
        agent_id: AgentId,
        at: u64,
    },
    KeyAdded {
        agent_id: AgentId,
        key_hash: [u8; 32],
        at: u64,
    },
    KeyRevoked {
        agent_id: AgentId,
        key_hash: [u8; 32],
        at: u64,
    },
    ApprovalForAgent {
        agent_id: AgentId,
        operator: Address,
        approved: bool,
    },
}
