//! sage_crypto — SAGE cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Public APIs return opaque newtypes to prevent accidental misuse.
//! - Every crypto operation is synchronous and touches nothing but its
//!   explicit inputs.
//!
//! # Module layout
//! - `keys`      — key families (kind tags, length rules, import/export traits)
//! - `ed25519`   — long-term Ed25519 signing keys
//! - `ecdsa`     — chain-owner secp256k1 keys + keccak address derivation
//! - `x25519`    — X25519 KEM keys
//! - `hpke`      — HPKE base mode (DHKEM-X25519, HKDF-SHA256, ChaCha20-Poly1305)
//! - `aead`      — ChaCha20-Poly1305 with 96-bit counter nonces
//! - `kdf`       — HKDF helpers + session key derivation from the HPKE exporter
//! - `hash`      — keccak-256 / SHA-256 utilities
//! - `error`     — unified error type

pub mod aead;
pub mod ecdsa;
pub mod ed25519;
pub mod error;
pub mod hash;
pub mod hpke;
pub mod kdf;
pub mod keys;
pub mod x25519;

pub use error::CryptoError;
pub use keys::{KeyKind, PublicKeyBytes};
