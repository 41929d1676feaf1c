//! EIP-191 ("personal_sign") message signing over secp256k1.
//!
//! The message is wrapped as `"\x19Ethereum Signed Message:\n" || len || message`
//! (length in ASCII decimal) and hashed with Keccak-256 before signing, so a signed
//! capture can never be replayed as a transaction or typed-data signature.

use anyhow::{anyhow, Result};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use super::Address;

pub const EIP191_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Length of an encoded recoverable signature (`r || s || v`).
pub const SIGNATURE_LEN: usize = 65;

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    Keccak256::digest(bytes).into()
}

/// Keccak-256 of the EIP-191 wrapped message.
pub fn hash_message(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(EIP191_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Signs `message` and returns `r || s || v` with `v` in {27, 28} and low-S.
pub fn sign_message(signing_key: &SigningKey, message: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
    let digest = hash_message(message);
    let (mut signature, mut recovery_id) = signing_key
        .sign_prehash_recoverable(&digest)
        .map_err(|e| anyhow!("secp256k1 signing failed: {}", e))?;
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }
    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = 27 + recovery_id.to_byte();
    Ok(out)
}

/// Recovers the signer address of an EIP-191 signature.
pub fn recover_address(message: &[u8], signature: &[u8]) -> Result<Address> {
    if signature.len() != SIGNATURE_LEN {
        return Err(anyhow!(
            "invalid signature length: expected {} bytes, got {}",
            SIGNATURE_LEN,
            signature.len()
        ));
    }
    let v = match signature[64] {
        27 | 28 => signature[64] - 27,
        0 | 1 => signature[64],
        other => return Err(anyhow!("invalid recovery byte {}", other)),
    };
    let recovery_id =
        RecoveryId::from_byte(v).ok_or_else(|| anyhow!("invalid recovery id {}", v))?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| anyhow!("malformed signature: {}", e))?;
    if sig.normalize_s().is_some() {
        return Err(anyhow!("signature is malleable (high S)"));
    }
    let digest = hash_message(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|e| anyhow!("public key recovery failed: {}", e))?;
    Ok(address_of(&key))
}

/// Verifies that `signature` over `message` was produced by `expected`.
pub fn verify_message(message: &[u8], signature: &[u8], expected: &Address) -> Result<()> {
    let recovered = recover_address(message, signature)?;
    if &recovered != expected {
        return Err(anyhow!(
            "signer mismatch: expected {}, recovered {}",
            expected,
            recovered
        ));
    }
    Ok(())
}

/// Ethereum address: last 20 bytes of Keccak-256 over the uncompressed point (sans 0x04).
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address::new(address)
}
