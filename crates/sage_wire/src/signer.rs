//! Signing side of RFC 9421.

use chrono::DateTime;

use sage_crypto::ed25519::Ed25519KeyPair;
use sage_crypto::keys::SigningPair;

use crate::digest::content_digest;
use crate::error::WireError;
use crate::http::{SignedRequest, SignedResponse};
use crate::sigbase::{
    build_base, format_signature, request_component_value, response_component_value,
    SignatureParams, COVERED_REQUEST, COVERED_REQUEST_WITH_BODY, COVERED_RESPONSE,
    SIGNATURE_LABEL,
};

fn http_date(created: i64) -> Result<String, WireError> {
    let ts = DateTime::from_timestamp(created, 0)
        .ok_or_else(|| WireError::MalformedMessage(format!("bad created timestamp {created}")))?;
    Ok(ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// Sign a request with the agent's static Ed25519 key. `key_id` is the
/// session's key id (base64url) — or the sender's DID during the
/// handshake. Sets `date` from `created` when absent and
/// `content-digest` whenever a body travels.
pub fn sign_request(
    req: &mut SignedRequest,
    key: &Ed25519KeyPair,
    key_id: &str,
    created: i64,
    nonce: &str,
) -> Result<(), WireError> {
    if req.header("host").is_none() {
        return Err(WireError::MissingHeader("host"));
    }
    if req.header("date").is_none() {
        let date = http_date(created)?;
        req.set_header("date", date);
    }

    let covered: &[&str] = if req.body.is_empty() {
        COVERED_REQUEST
    } else {
        let digest = content_digest(&req.body);
        req.set_header("content-digest", digest);
        COVERED_REQUEST_WITH_BODY
    };

    let params = SignatureParams::new(key_id, created, nonce);
    let mut components = Vec::with_capacity(covered.len());
    for name in covered {
        components.push((name.to_string(), request_component_value(req, name)?));
    }
    let base = build_base(&components, &params.serialize(covered));
    let sig = key.sign(base.as_bytes())?;

    req.set_header(
        "signature-input",
        format!("{SIGNATURE_LABEL}={}", params.serialize(covered)),
    );
    req.set_header("signature", format_signature(&sig));
    Ok(())
}

/// Sign a response. Responses always cover the status and a
/// content-digest (an empty body digests fine).
pub fn sign_response(
    resp: &mut SignedResponse,
    key: &Ed25519KeyPair,
    key_id: &str,
    created: i64,
    nonce: &str,
) -> Result<(), WireError> {
    resp.set_header("content-digest", content_digest(&resp.body));

    let params = SignatureParams::new(key_id, created, nonce);
    let mut components = Vec::with_capacity(COVERED_RESPONSE.len());
    for name in COVERED_RESPONSE {
        components.push((name.to_string(), response_component_value(resp, name)?));
    }
    let base = build_base(&components, &params.serialize(COVERED_RESPONSE));
    let sig = key.sign(base.as_bytes())?;

    resp.set_header(
        "signature-input",
        format!("{SIGNATURE_LABEL}={}", params.serialize(COVERED_RESPONSE)),
    );
    resp.set_header("signature", format_signature(&sig));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_crypto::keys::KeyPair;

    #[test]
    fn signing_sets_both_headers() {
        let key = Ed25519KeyPair::generate().unwrap();
        let mut req = SignedRequest::new("POST", "/sage/message");
        req.set_header("host", "agent.example");
        sign_request(&mut req, &key, "kid", 1_700_000_000, "n1").unwrap();
        assert!(req.header("signature-input").unwrap().starts_with("sig1=("));
        assert!(req.header("signature").unwrap().starts_with("sig1=:"));
        assert!(req.header("date").is_some());
    }

    #[test]
    fn body_adds_content_digest_coverage() {
        let key = Ed25519KeyPair::generate().unwrap();
        let mut req = SignedRequest::new("POST", "/x").with_body(b"payload".to_vec());
        req.set_header("host", "h");
        sign_request(&mut req, &key, "kid", 1_700_000_000, "n1").unwrap();
        assert!(req.header("content-digest").is_some());
        assert!(req
            .header("signature-input")
            .unwrap()
            .contains("\"content-digest\""));
    }

    #[test]
    fn missing_host_refused() {
        let key = Ed25519KeyPair::generate().unwrap();
        let mut req = SignedRequest::new("GET", "/");
        assert!(matches!(
            sign_request(&mut req, &key, "kid", 0, "n"),
            Err(WireError::MissingHeader("host"))
        ));
    }
}
