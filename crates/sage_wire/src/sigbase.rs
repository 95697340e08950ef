//! RFC 9421 signature base construction and header parsing.
//!
//! The base is rebuilt independently by signer and verifier; any
//! divergence (a flipped byte in `date`, a reordered component list)
//! fails verification. Component identifiers are serialized lowercase
//! and quoted; parameters ride in the fixed order
//! `keyid`, `alg`, `created`, `nonce`.

use crate::error::WireError;
use crate::http::{SignedRequest, SignedResponse};

pub const SIGNATURE_LABEL: &str = "sig1";
pub const ALG_ED25519: &str = "ed25519";

/// Covered components for requests without a body.
pub const COVERED_REQUEST: &[&str] = &["@method", "@path", "host", "date"];
/// Covered components for requests carrying a body.
pub const COVERED_REQUEST_WITH_BODY: &[&str] =
    &["@method", "@path", "host", "date", "content-digest"];
/// Covered components for responses.
pub const COVERED_RESPONSE: &[&str] = &["@status", "content-digest"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    pub key_id: String,
    pub alg: String,
    pub created: i64,
    pub nonce: String,
}

impl SignatureParams {
    pub fn new(key_id: impl Into<String>, created: i64, nonce: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            alg: ALG_ED25519.to_string(),
            created,
            nonce: nonce.into(),
        }
    }

    /// The serialized inner list: what follows `sig1=` in
    /// `Signature-Input` and what the base's last line carries.
    pub fn serialize(&self, covered: &[&str]) -> String {
        let list = covered
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "({list});keyid=\"{}\";alg=\"{}\";created={};nonce=\"{}\"",
            self.key_id, self.alg, self.created, self.nonce
        )
    }
}

// ── Component values ─────────────────────────────────────────────────────────

pub fn request_component_value(req: &SignedRequest, name: &str) -> Result<String, WireError> {
    match name {
        "@method" => Ok(req.method.to_ascii_uppercase()),
        "@path" => Ok(req.path.clone()),
        header => req
            .header(header)
            .map(str::to_owned)
            .ok_or(WireError::SignatureInvalid(format!(
                "covered header {header:?} absent"
            ))),
    }
}

pub fn response_component_value(resp: &SignedResponse, name: &str) -> Result<String, WireError> {
    match name {
        "@status" => Ok(resp.status.to_string()),
        header => resp
            .header(header)
            .map(str::to_owned)
            .ok_or(WireError::SignatureInvalid(format!(
                "covered header {header:?} absent"
            ))),
    }
}

/// Assemble the canonical base string.
pub fn build_base(components: &[(String, String)], params_serialized: &str) -> String {
    let mut base = String::new();
    for (name, value) in components {
        base.push('"');
        base.push_str(name);
        base.push_str("\": ");
        base.push_str(value);
        base.push('\n');
    }
    base.push_str("\"@signature-params\": ");
    base.push_str(params_serialized);
    base
}

// ── Header parsing ───────────────────────────────────────────────────────────

/// Parse a `Signature-Input` value of the form emitted by this module:
/// `sig1=("@method" "@path" ...);keyid="...";alg="...";created=N;nonce="..."`.
pub fn parse_signature_input(value: &str) -> Result<(Vec<String>, SignatureParams), WireError> {
    let rest = value
        .trim()
        .strip_prefix(SIGNATURE_LABEL)
        .and_then(|r| r.strip_prefix('='))
        .ok_or_else(|| WireError::SignatureInvalid("no sig1 signature present".into()))?;

    let open = rest
        .strip_prefix('(')
        .ok_or_else(|| WireError::SignatureInvalid("missing component list".into()))?;
    let close = open
        .find(')')
        .ok_or_else(|| WireError::SignatureInvalid("unterminated component list".into()))?;
    let (list, mut tail) = open.split_at(close);
    tail = &tail[1..]; // consume ')'

    let mut covered = Vec::new();
    for item in list.split_whitespace() {
        let name = item
            .strip_prefix('"')
            .and_then(|i| i.strip_suffix('"'))
            .ok_or_else(|| WireError::SignatureInvalid("unquoted component id".into()))?;
        covered.push(name.to_owned());
    }
    if covered.is_empty() {
        return Err(WireError::SignatureInvalid("empty component list".into()));
    }

    let mut key_id = None;
    let mut alg = None;
    let mut created = None;
    let mut nonce = None;
    for param in tail.split(';').filter(|p| !p.trim().is_empty()) {
        let (name, raw) = param
            .trim()
            .split_once('=')
            .ok_or_else(|| WireError::SignatureInvalid(format!("bad parameter {param:?}")))?;
        let unquoted = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"'));
        match name {
            "keyid" => {
                key_id = Some(
                    unquoted
                        .ok_or_else(|| WireError::SignatureInvalid("keyid must be quoted".into()))?
                        .to_owned(),
                )
            }
            "alg" => {
                alg = Some(
                    unquoted
                        .ok_or_else(|| WireError::SignatureInvalid("alg must be quoted".into()))?
                        .to_owned(),
                )
            }
            "created" => {
                created = Some(raw.parse::<i64>().map_err(|_| {
                    WireError::SignatureInvalid(format!("bad created value {raw:?}"))
                })?)
            }
            "nonce" => {
                nonce = Some(
                    unquoted
                        .ok_or_else(|| WireError::SignatureInvalid("nonce must be quoted".into()))?
                        .to_owned(),
                )
            }
            // Unknown parameters are tolerated but not covered here.
            _ => {}
        }
    }

    let params = SignatureParams {
        key_id: key_id.ok_or_else(|| WireError::SignatureInvalid("missing keyid".into()))?,
        alg: alg.ok_or_else(|| WireError::SignatureInvalid("missing alg".into()))?,
        created: created.ok_or_else(|| WireError::SignatureInvalid("missing created".into()))?,
        nonce: nonce.ok_or_else(|| WireError::SignatureInvalid("missing nonce".into()))?,
    };
    Ok((covered, params))
}

/// Parse a `Signature` value: `sig1=:<base64 raw signature>:`.
pub fn parse_signature(value: &str) -> Result<Vec<u8>, WireError> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    let b64 = value
        .trim()
        .strip_prefix(SIGNATURE_LABEL)
        .and_then(|r| r.strip_prefix("=:"))
        .and_then(|r| r.strip_suffix(':'))
        .ok_or_else(|| WireError::SignatureInvalid("malformed Signature header".into()))?;
    STANDARD
        .decode(b64)
        .map_err(|e| WireError::SignatureInvalid(format!("bad signature base64: {e}")))
}

pub fn format_signature(sig: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    format!("{SIGNATURE_LABEL}=:{}:", STANDARD.encode(sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_roundtrip_through_header() {
        let params = SignatureParams::new("a2V5", 1_700_000_000, "bm9uY2U");
        let serialized = params.serialize(COVERED_REQUEST);
        let header = format!("{SIGNATURE_LABEL}={serialized}");
        let (covered, parsed) = parse_signature_input(&header).unwrap();
        assert_eq!(covered, COVERED_REQUEST);
        assert_eq!(parsed, params);
    }

    #[test]
    fn base_matches_expected_shape() {
        let components = vec![
            ("@method".to_string(), "POST".to_string()),
            ("@path".to_string(), "/sage/message".to_string()),
            ("host".to_string(), "agent.example".to_string()),
            ("date".to_string(), "Tue, 14 Nov 2023 00:00:00 GMT".to_string()),
        ];
        let params = SignatureParams::new("kid", 1_700_000_000, "n1");
        let base = build_base(&components, &params.serialize(COVERED_REQUEST));
        let expected = "\"@method\": POST\n\
                        \"@path\": /sage/message\n\
                        \"host\": agent.example\n\
                        \"date\": Tue, 14 Nov 2023 00:00:00 GMT\n\
                        \"@signature-params\": (\"@method\" \"@path\" \"host\" \"date\");keyid=\"kid\";alg=\"ed25519\";created=1700000000;nonce=\"n1\"";
        assert_eq!(base, expected);
    }

    #[test]
    fn signature_value_roundtrip() {
        let sig = vec![7u8; 64];
        assert_eq!(parse_signature(&format_signature(&sig)).unwrap(), sig);
    }

    #[test]
    fn rejects_foreign_label() {
        assert!(parse_signature_input("sig2=(\"@method\");keyid=\"k\";alg=\"ed25519\";created=1;nonce=\"n\"").is_err());
    }
}
