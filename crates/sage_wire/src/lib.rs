//! sage_wire — authenticated HTTP message exchange
//!
//! Every request an agent sends is signed per RFC 9421 (HTTP Message
//! Signatures): requests cover `"@method" "@path" "host" "date"` (plus
//! `"content-digest"` when a body travels), responses cover
//! `"@status" "content-digest"`. The `keyid` parameter references a
//! session in the store — or, during the handshake, the peer's DID.
//!
//! # Modules
//! - `http`      — method/path/header/body frames the adapters carry
//! - `digest`    — `content-digest` structured field (sha-256)
//! - `sigbase`   — signature base construction and header parsing
//! - `signer`    — build + attach `Signature-Input` / `Signature`
//! - `verifier`  — skew, key resolution, base reconstruction, replay
//! - `message`   — handshake and app envelopes (JSON bodies)
//! - `transport` — adapter trait, HTTP (reqwest) and loopback bindings
//! - `error`     — unified error type

pub mod digest;
pub mod error;
pub mod http;
pub mod message;
pub mod sigbase;
pub mod signer;
pub mod transport;
pub mod verifier;

pub use error::WireError;
pub use http::{SignedRequest, SignedResponse};
pub use message::{Invitation, InvitationAck, MessageEnvelope, INVITE_PATH, MESSAGE_PATH};
pub use transport::{LoopbackTransport, RequestHandler, Transport};
pub use verifier::{SessionKeySource, SignatureKeySource, StaticKeySource, VerifyPolicy};
