//! Commit-hash and key-challenge encodings.
//!
//! Both encodings are ABI-exact so independent implementations agree
//! byte for byte:
//!
//!   commitHash = keccak256(abi.encode(
//!       string did, bytes[] keys, address owner, bytes32 salt, uint256 chainId))
//!
//!   challenge  = keccak256("SAGE Key Registration:"
//!       || uint256(chainId) || address(registry) || address(owner)
//!       || bytes32(keyHash))
//!   signed     = personal_sign(challenge)
//!
//! Structured `abi.encode` (never `encodePacked`) precludes
//! length-confusion between adjacent dynamic fields.

use ethabi::{Address as EthAddress, Token, Uint};
use rand::RngCore;

use sage_crypto::error::CryptoError;
use sage_crypto::hash::{eth_signed_digest, keccak256};
use sage_crypto::keys::KeyPair;
use sage_crypto::ecdsa::{address_from_public, recover_address, EcdsaKeyPair};

use crate::error::RegistryError;
use crate::record::Address;

const KEY_CHALLENGE_PREFIX: &[u8] = b"SAGE Key Registration:";

/// Deterministic commit hash over the reveal parameters.
pub fn commit_hash(
    did: &str,
    keys: &[Vec<u8>],
    owner: &Address,
    salt: &[u8; 32],
    chain_id: u64,
) -> [u8; 32] {
    let tokens = [
        Token::String(did.to_string()),
        Token::Array(keys.iter().map(|k| Token::Bytes(k.clone())).collect()),
        Token::Address(EthAddress::from_slice(owner)),
        Token::FixedBytes(salt.to_vec()),
        Token::Uint(Uint::from(chain_id)),
    ];
    keccak256(&ethabi::encode(&tokens))
}

/// Random 32-byte commitment salt.
pub fn random_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// The unwrapped challenge digest a key must prove ownership of.
pub fn key_challenge_digest(
    chain_id: u64,
    registry: &Address,
    owner: &Address,
    key_hash: &[u8; 32],
) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(KEY_CHALLENGE_PREFIX.len() + 32 + 20 + 20 + 32);
    preimage.extend_from_slice(KEY_CHALLENGE_PREFIX);
    let mut chain_word = [0u8; 32];
    chain_word[24..].copy_from_slice(&chain_id.to_be_bytes());
    preimage.extend_from_slice(&chain_word);
    preimage.extend_from_slice(registry);
    preimage.extend_from_slice(owner);
    preimage.extend_from_slice(key_hash);
    keccak256(&preimage)
}

/// Sign the challenge for `key_bytes` with `signer` (personal-sign
/// envelope). For ECDSA keys the signer IS the key being registered;
/// for Ed25519/X25519 keys the owner key signs and the hook checks it.
pub fn sign_key_proof(
    signer: &EcdsaKeyPair,
    chain_id: u64,
    registry: &Address,
    owner: &Address,
    key_bytes: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let key_hash = keccak256(key_bytes);
    let digest = eth_signed_digest(&key_challenge_digest(chain_id, registry, owner, &key_hash));
    Ok(signer.sign_recoverable(&digest)?.to_vec())
}

/// Verify an ECDSA key's self-proof: the recovered signer address must
/// equal the address derived from the key itself.
pub fn verify_ecdsa_key_proof(
    key_bytes: &[u8],
    proof: &[u8],
    chain_id: u64,
    registry: &Address,
    owner: &Address,
) -> Result<(), RegistryError> {
    let key_hash = keccak256(key_bytes);
    let digest = eth_signed_digest(&key_challenge_digest(chain_id, registry, owner, &key_hash));
    let recovered = recover_address(&digest, proof)
        .map_err(|e| RegistryError::SignatureInvalid(e.to_string()))?;
    let expected = address_from_public(key_bytes)
        .map_err(|e| RegistryError::SignatureInvalid(e.to_string()))?;
    if recovered != expected {
        return Err(RegistryError::SignatureInvalid(
            "recovered address does not match key".into(),
        ));
    }
    Ok(())
}

/// Verify an owner-signed proof for an Ed25519/X25519 key (the
/// reference off-chain validation policy used by the default hook).
pub fn verify_owner_key_proof(
    key_bytes: &[u8],
    proof: &[u8],
    chain_id: u64,
    registry: &Address,
    owner: &Address,
) -> Result<(), RegistryError> {
    let key_hash = keccak256(key_bytes);
    let digest = eth_signed_digest(&key_challenge_digest(chain_id, registry, owner, &key_hash));
    let recovered = recover_address(&digest, proof)
        .map_err(|e| RegistryError::SignatureInvalid(e.to_string()))?;
    if &recovered != owner {
        return Err(RegistryError::SignatureInvalid(
            "proof not signed by owner".into(),
        ));
    }
    Ok(())
}

/// Convenience used by clients building reveal parameters.
pub fn proof_for_key(
    owner_key: &EcdsaKeyPair,
    chain_id: u64,
    registry: &Address,
    key_bytes: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let owner = owner_key.address()?;
    sign_key_proof(owner_key, chain_id, registry, &owner, key_bytes)
}
