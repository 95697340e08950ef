//! DID algebra.
//!
//! `did:sage:<chain>:<0x-prefixed-lowercase-20-byte-hex>[:nonce]`
//!
//! The chain-specific id is the address derived from the owning
//! secp256k1 key (keccak of the uncompressed 64-byte body, low 20
//! bytes). A trailing base-10 nonce disambiguates multiple agents per
//! owner address; absence is equivalent to nonce 0, and the canonical
//! form omits a zero nonce.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use sage_crypto::hash::keccak256;
use sage_crypto::ecdsa::address_from_public;

use crate::error::DidError;
use crate::record::AgentId;

const DID_PREFIX: &str = "did:sage:";
/// Shortest well-formed DID the contract will accept ("did:sage:" plus
/// at least a one-char chain, a colon, and a non-empty id).
const DID_MIN_LEN: usize = 21;

// ── Chains ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Kaia,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Kaia => "kaia",
        }
    }

    pub fn all() -> &'static [Chain] {
        &[Chain::Ethereum, Chain::Kaia]
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(Chain::Ethereum),
            "kaia" => Ok(Chain::Kaia),
            other => Err(DidError::UnsupportedChain(other.to_string())),
        }
    }
}

// ── DID ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentDid {
    pub chain: Chain,
    pub address: [u8; 20],
    /// Preserved exactly as parsed so parse→format round-trips; `None`
    /// and `Some(0)` name the same agent.
    pub nonce: Option<u64>,
}

impl AgentDid {
    pub fn new(chain: Chain, address: [u8; 20]) -> Self {
        Self {
            chain,
            address,
            nonce: None,
        }
    }

    pub fn with_nonce(chain: Chain, address: [u8; 20], nonce: u64) -> Self {
        Self {
            chain,
            address,
            nonce: Some(nonce),
        }
    }

    /// Derive the DID for a secp256k1 public key (compressed or
    /// uncompressed encoding).
    pub fn from_ecdsa_public(chain: Chain, public: &[u8]) -> Result<Self, DidError> {
        Ok(Self::new(chain, address_from_public(public)?))
    }

    pub fn effective_nonce(&self) -> u64 {
        self.nonce.unwrap_or(0)
    }

    /// Two DIDs name the same agent when chain, address and effective
    /// nonce agree (`:0` and no nonce are the same agent).
    pub fn same_agent(&self, other: &AgentDid) -> bool {
        self.chain == other.chain
            && self.address == other.address
            && self.effective_nonce() == other.effective_nonce()
    }

    /// Canonical string: zero nonce omitted.
    pub fn canonical(&self) -> String {
        let mut s = format!("{DID_PREFIX}{}:0x{}", self.chain, hex::encode(self.address));
        if self.effective_nonce() != 0 {
            s.push(':');
            s.push_str(&self.effective_nonce().to_string());
        }
        s
    }

    /// Contract-level agent id: keccak-256 of the canonical DID string.
    pub fn agent_id(&self) -> AgentId {
        keccak256(self.canonical().as_bytes())
    }

    /// Structural rules enforced at the contract boundary: minimum
    /// length and the exact `did:sage:` byte prefix.
    pub fn validate_contract_form(s: &str) -> Result<(), DidError> {
        if s.len() < DID_MIN_LEN {
            return Err(DidError::InvalidDid(format!(
                "DID shorter than {DID_MIN_LEN} bytes"
            )));
        }
        if !s.starts_with(DID_PREFIX) {
            return Err(DidError::InvalidDid("missing did:sage: prefix".into()));
        }
        Ok(())
    }
}

impl fmt::Display for AgentDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DID_PREFIX}{}:0x{}", self.chain, hex::encode(self.address))?;
        if let Some(n) = self.nonce {
            write!(f, ":{n}")?;
        }
        Ok(())
    }
}

impl FromStr for AgentDid {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 && parts.len() != 5 {
            return Err(DidError::InvalidDid(format!(
                "expected 4 or 5 ':'-separated segments, got {}",
                parts.len()
            )));
        }
        if parts[0] != "did" {
            return Err(DidError::InvalidDid("scheme must be 'did'".into()));
        }
        if parts[1] != "sage" {
            return Err(DidError::InvalidDid("method must be 'sage'".into()));
        }
        let chain: Chain = parts[2].parse()?;

        let id = parts[3];
        let hex_part = id
            .strip_prefix("0x")
            .ok_or_else(|| DidError::InvalidDid("identifier must be 0x-prefixed".into()))?;
        if hex_part.len() != 40 {
            return Err(DidError::InvalidDid(format!(
                "identifier must be 20 bytes of hex, got {} chars",
                hex_part.len()
            )));
        }
        let lowered = hex_part.to_ascii_lowercase();
        let mut address = [0u8; 20];
        hex::decode_to_slice(&lowered, &mut address)
            .map_err(|e| DidError::InvalidDid(format!("bad hex identifier: {e}")))?;

        let nonce = match parts.get(4) {
            None => None,
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| DidError::InvalidDid(format!("bad nonce {raw:?}")))?,
            ),
        };

        Ok(Self {
            chain,
            address,
            nonce,
        })
    }
}

impl Serialize for AgentDid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AgentDid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0x00a329c0648769a73afac7f9381e08fb43dbea72";

    #[test]
    fn parse_format_roundtrip() {
        for input in [
            format!("did:sage:ethereum:{ADDR}"),
            format!("did:sage:kaia:{ADDR}"),
            format!("did:sage:ethereum:{ADDR}:3"),
            format!("did:sage:ethereum:{ADDR}:0"),
        ] {
            let did: AgentDid = input.parse().unwrap();
            assert_eq!(did.to_string(), input);
        }
    }

    #[test]
    fn uppercase_hex_is_lowercased() {
        let input = format!("did:sage:ethereum:0x{}", "00A329C0648769A73AFAC7F9381E08FB43DBEA72");
        let did: AgentDid = input.parse().unwrap();
        assert_eq!(did.to_string(), input.to_lowercase());
    }

    #[test]
    fn zero_nonce_names_same_agent() {
        let a: AgentDid = format!("did:sage:ethereum:{ADDR}").parse().unwrap();
        let b: AgentDid = format!("did:sage:ethereum:{ADDR}:0").parse().unwrap();
        assert!(a.same_agent(&b));
        assert_eq!(a.agent_id(), b.agent_id());
        let c: AgentDid = format!("did:sage:ethereum:{ADDR}:1").parse().unwrap();
        assert!(!a.same_agent(&c));
        assert_ne!(a.agent_id(), c.agent_id());
    }

    #[test]
    fn malformed_dids_rejected() {
        for bad in [
            "did:sage:ethereum",
            "did:sage:solana:0x00a329c0648769a73afac7f9381e08fb43dbea72",
            "did:web:ethereum:0x00a329c0648769a73afac7f9381e08fb43dbea72",
            "urn:sage:ethereum:0x00a329c0648769a73afac7f9381e08fb43dbea72",
            "did:sage:ethereum:00a329c0648769a73afac7f9381e08fb43dbea72",
            "did:sage:ethereum:0x00a329",
            "did:sage:ethereum:0x00a329c0648769a73afac7f9381e08fb43dbea72:-1",
            "did:sage:ethereum:0x00a329c0648769a73afac7f9381e08fb43dbea72:x",
        ] {
            assert!(bad.parse::<AgentDid>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn contract_form_rules() {
        AgentDid::validate_contract_form("did:sage:ethereum:0xabc1").unwrap();
        assert!(AgentDid::validate_contract_form("did:sage:e:1").is_err());
        assert!(AgentDid::validate_contract_form("did:web:something-long-enough").is_err());
    }

    #[test]
    fn address_derivation_from_key() {
        use sage_crypto::keys::KeyPair;
        let kp = sage_crypto::ecdsa::EcdsaKeyPair::generate().unwrap();
        let did = AgentDid::from_ecdsa_public(Chain::Ethereum, &kp.public().0).unwrap();
        assert_eq!(did.address, kp.address().unwrap());
    }
}
