//! sage_did — agent identity on a public ledger
//!
//! An agent's identity is a DID (`did:sage:<chain>:<address>[:nonce]`)
//! anchored to a registry contract. This crate owns:
//!
//! - `did`      — DID parsing, formatting, chain dispatch, address rules
//! - `record`   — agent records, key bindings, registration parameters
//! - `commit`   — commit-hash and key-challenge encodings (ABI-exact)
//! - `config`   — registry rate-limit / stake / delay parameters
//! - `events`   — the contract event set
//! - `hooks`    — before/after registration policy capability
//! - `ledger`   — the registry contract surface + in-memory reference chain
//! - `registry` — commit–reveal client over the contract surface
//! - `resolver` — verified resolution with TTL caching and coalescing
//!
//! Registration is commit–reveal ONLY. The historical direct-register
//! path is deliberately absent from the contract surface here; a live
//! deployment may still expose it on-chain, but no client in this
//! workspace will call it.

pub mod commit;
pub mod config;
pub mod did;
pub mod error;
pub mod events;
pub mod hooks;
pub mod ledger;
pub mod record;
pub mod registry;
pub mod resolver;

pub use did::{AgentDid, Chain};
pub use error::{DidError, RegistryError};
pub use record::{AgentId, AgentKey, AgentRecord, KeyStatus, RegistrationParams};
