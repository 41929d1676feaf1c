//! Device identity and capture signing.
//!
//! A capture is signed with the device's secp256k1 key using EIP-191 over the
//! canonical payload bytes. Signing never aborts a capture: a missing key yields the
//! `UNSIGNED_NO_PRIVATE_KEY` sentinel and any signing fault yields
//! `SIGNATURE_ERROR_<reason>`. Both sentinels fail verification.

use anyhow::{anyhow, Result};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::payload::CanonicalPayload;

pub mod eip191;

pub const UNSIGNED_SENTINEL: &str = "UNSIGNED_NO_PRIVATE_KEY";
pub const SIGNATURE_ERROR_PREFIX: &str = "SIGNATURE_ERROR_";

// -------------------- Address --------------------

/// 20-byte Ethereum-style account address. Displays with EIP-55 checksum casing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address([u8; 20]);

impl Address {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lower = hex::encode(self.0);
        let hash = eip191::keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        f.write_str(&out)
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    /// Accepts any casing; checksum casing is not enforced.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(hex_part).map_err(|e| anyhow!("invalid address hex: {}", e))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| anyhow!("address must be 20 bytes"))?;
        Ok(Self(bytes))
    }
}

// -------------------- Device key --------------------

/// The device's secp256k1 signing key.
pub struct DeviceKey {
    signing_key: SigningKey,
}

impl DeviceKey {
    /// Parses a 32-byte hex private key, with or without `0x`.
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let trimmed = private_key.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = Zeroizing::new(
            hex::decode(hex_part).map_err(|e| anyhow!("private key is not valid hex: {}", e))?,
        );
        if bytes.len() != 32 {
            return Err(anyhow!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            ));
        }
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| anyhow!("private key is not a valid secp256k1 scalar: {}", e))?;
        Ok(Self { signing_key })
    }

    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn address(&self) -> Address {
        eip191::address_of(self.signing_key.verifying_key())
    }

    /// `0x`-prefixed private key hex. Handle with care.
    pub fn to_hex(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.signing_key.to_bytes().to_vec());
        Zeroizing::new(format!("0x{}", hex::encode(&*bytes)))
    }

    pub fn sign_message(&self, message: &[u8]) -> Result<String> {
        let signature = eip191::sign_message(&self.signing_key, message)?;
        Ok(format!("0x{}", hex::encode(signature)))
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKey")
            .field("address", &self.address().to_string())
            .finish_non_exhaustive()
    }
}

// -------------------- Capture signature --------------------

/// Signature slot of a signed capture. Serialized as a single string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum CaptureSignature {
    /// `0x`-prefixed hex of `r || s || v`.
    Signed(String),
    /// No signing key was configured.
    Unsigned,
    /// Signing failed; carries the failure reason.
    Failed(String),
}

impl CaptureSignature {
    pub fn is_signed(&self) -> bool {
        matches!(self, CaptureSignature::Signed(_))
    }

    pub fn as_wire(&self) -> String {
        match self {
            CaptureSignature::Signed(hex) => hex.clone(),
            CaptureSignature::Unsigned => UNSIGNED_SENTINEL.to_string(),
            CaptureSignature::Failed(reason) => format!("{}{}", SIGNATURE_ERROR_PREFIX, reason),
        }
    }
}

impl From<CaptureSignature> for String {
    fn from(value: CaptureSignature) -> Self {
        value.as_wire()
    }
}

impl From<String> for CaptureSignature {
    fn from(value: String) -> Self {
        if value == UNSIGNED_SENTINEL {
            CaptureSignature::Unsigned
        } else if let Some(reason) = value.strip_prefix(SIGNATURE_ERROR_PREFIX) {
            CaptureSignature::Failed(reason.to_string())
        } else {
            CaptureSignature::Signed(value)
        }
    }
}

impl fmt::Display for CaptureSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire())
    }
}

/// A canonical payload and its signature; the terminal local artifact of a capture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedCapture {
    pub data: CanonicalPayload,
    pub signature: CaptureSignature,
}

impl SignedCapture {
    /// Storage metadata document: canonical fields plus `signature`.
    pub fn metadata_document(&self) -> Result<serde_json::Value> {
        self.data.metadata_document(&self.signature.as_wire())
    }
}

/// Signs the payload's canonical bytes. Never fails; faults become sentinels.
pub fn sign(payload: &CanonicalPayload, private_key: Option<&str>) -> CaptureSignature {
    let Some(private_key) = private_key.filter(|k| !k.trim().is_empty()) else {
        log::warn!("no device signing key configured; capture will be unsigned");
        return CaptureSignature::Unsigned;
    };
    match try_sign(payload, private_key) {
        Ok(signature) => signature,
        Err(e) => {
            log::warn!("signing failed: {:#}", e);
            CaptureSignature::Failed(e.to_string())
        }
    }
}

fn try_sign(payload: &CanonicalPayload, private_key: &str) -> Result<CaptureSignature> {
    let key = DeviceKey::from_hex(private_key)?;
    let bytes = payload.canonical_bytes()?;
    let signature = key.sign_message(&bytes)?;
    log::info!("capture signed by {}", key.address());
    Ok(CaptureSignature::Signed(signature))
}

pub fn sign_capture(payload: CanonicalPayload, private_key: Option<&str>) -> SignedCapture {
    let signature = sign(&payload, private_key);
    SignedCapture {
        data: payload,
        signature,
    }
}

/// Recovers the address that signed `capture`. Sentinel signatures are rejected.
pub fn recover_signer(capture: &SignedCapture) -> Result<Address> {
    let hex_sig = match &capture.signature {
        CaptureSignature::Signed(hex_sig) => hex_sig,
        CaptureSignature::Unsigned => return Err(anyhow!("capture is unsigned")),
        CaptureSignature::Failed(reason) => {
            return Err(anyhow!("capture carries a signing error: {}", reason))
        }
    };
    let raw = hex::decode(hex_sig.trim_start_matches("0x"))
        .map_err(|e| anyhow!("signature is not valid hex: {}", e))?;
    let bytes = capture.data.canonical_bytes()?;
    eip191::recover_address(&bytes, &raw)
}

/// Verifies that `capture` was signed by `expected`.
pub fn verify_capture(capture: &SignedCapture, expected: &Address) -> Result<()> {
    let recovered = recover_signer(capture)?;
    if &recovered != expected {
        return Err(anyhow!(
            "signer mismatch: expected {}, recovered {}",
            expected,
            recovered
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::{encode, DisparityField};
    use crate::frame::Frame;
    use crate::payload::build;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn payload() -> CanonicalPayload {
        let field = DisparityField::from_fn(3, 3, |r, _| r as f32).unwrap();
        let frame = Frame::filled(3, 3, [1, 2, 3]).unwrap();
        build(7, &frame, &frame, encode(&field)).unwrap()
    }

    #[test]
    fn signed_capture_verifies_against_device_address() {
        let capture = sign_capture(payload(), Some(DEV_KEY));
        assert!(capture.signature.is_signed());
        let address = DeviceKey::from_hex(DEV_KEY).unwrap().address();
        verify_capture(&capture, &address).unwrap();
    }

    #[test]
    fn key_without_prefix_is_accepted() {
        let capture = sign_capture(payload(), Some(DEV_KEY.trim_start_matches("0x")));
        assert!(capture.signature.is_signed());
    }

    #[test]
    fn missing_key_yields_unsigned_sentinel() {
        let capture = sign_capture(payload(), None);
        assert_eq!(capture.signature, CaptureSignature::Unsigned);
        assert_eq!(capture.signature.as_wire(), "UNSIGNED_NO_PRIVATE_KEY");
        let address = DeviceKey::from_hex(DEV_KEY).unwrap().address();
        assert!(verify_capture(&capture, &address).is_err());
    }

    #[test]
    fn malformed_key_yields_error_sentinel() {
        let capture = sign_capture(payload(), Some("0xnot-a-key"));
        match &capture.signature {
            CaptureSignature::Failed(reason) => assert!(reason.contains("hex")),
            other => panic!("unexpected signature {other:?}"),
        }
        assert!(capture.signature.as_wire().starts_with("SIGNATURE_ERROR_"));
        assert!(recover_signer(&capture).is_err());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let mut capture = sign_capture(payload(), Some(DEV_KEY));
        capture.data.timestamp += 1;
        let address = DeviceKey::from_hex(DEV_KEY).unwrap().address();
        assert!(verify_capture(&capture, &address).is_err());
    }

    #[test]
    fn signature_survives_json_round_trip() {
        let capture = sign_capture(payload(), Some(DEV_KEY));
        let json = serde_json::to_string_pretty(&capture).unwrap();
        let back: SignedCapture = serde_json::from_str(&json).unwrap();
        assert_eq!(back, capture);
        let address = DeviceKey::from_hex(DEV_KEY).unwrap().address();
        verify_capture(&back, &address).unwrap();
    }

    #[test]
    fn sentinel_strings_parse_back() {
        assert_eq!(
            CaptureSignature::from("UNSIGNED_NO_PRIVATE_KEY".to_string()),
            CaptureSignature::Unsigned
        );
        assert_eq!(
            CaptureSignature::from("SIGNATURE_ERROR_boom".to_string()),
            CaptureSignature::Failed("boom".to_string())
        );
    }

    #[test]
    fn address_parses_any_case_and_displays_checksummed() {
        let a: Address = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse().unwrap();
        assert_eq!(a.to_string(), "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
        assert!("0x1234".parse::<Address>().is_err());
    }

    #[test]
    fn generated_keys_round_trip_through_hex() {
        let key = DeviceKey::generate();
        let again = DeviceKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key.address(), again.address());
    }
}
