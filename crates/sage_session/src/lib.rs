//! sage_session — symmetric session state between two agents
//!
//! A session is minted from the HPKE exporter secret after a
//! handshake. It owns two directional AEAD keys, two monotonic nonce
//! counters, and a policy (TTL, idle timeout, message cap). The store
//! maps session ids and key ids to live sessions; the replay cache
//! backs the signature verifier.
//!
//! Expiry is enforced INLINE on every cryptographic operation — a
//! background reaper is an optimization, never a correctness
//! requirement. A session in a terminal state answers every operation
//! with the same `session-expired` error regardless of which policy
//! fired.
//!
//! # Modules
//! - `session` — per-session AEAD state and lifecycle
//! - `store`   — shared-state session map, key-id index, reaper
//! - `replay`  — bounded (key id, nonce) → first-seen window
//! - `policy`  — TTL / idle / cap configuration
//! - `error`   — unified error type

pub mod error;
pub mod policy;
pub mod replay;
pub mod session;
pub mod store;

pub use error::SessionError;
pub use policy::SessionPolicy;
pub use replay::ReplayCache;
pub use session::{EncryptedPacket, SecureSession, SessionState};
pub use store::{SessionStore, SharedSession};
