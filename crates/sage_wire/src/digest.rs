//! `content-digest` structured field (RFC 9530, sha-256 only).
//!
//! Bodies are opaque bytes; the digest header is how a signature covers
//! them without canonicalizing arbitrary content types.

use base64::{engine::general_purpose::STANDARD, Engine};

use sage_crypto::hash::sha256;

pub fn content_digest(body: &[u8]) -> String {
    format!("sha-256=:{}:", STANDARD.encode(sha256(body)))
}

pub fn matches_body(header_value: &str, body: &[u8]) -> bool {
    header_value == content_digest(body)
}
