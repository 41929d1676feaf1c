//! Canonical payload builder.
//!
//! The signing contract: the logical document is serialized as JSON with object keys
//! sorted lexicographically (by UTF-8 bytes) at every depth and no whitespace between
//! tokens. Numbers use serde_json's shortest round-trip formatting. Any verifier must
//! reproduce exactly these bytes; changing the key set or formatting invalidates every
//! signature issued before the change.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::depth::DepthRecord;
use crate::frame::Frame;

/// Key under which the signature is appended to the storage metadata document.
pub const SIGNATURE_KEY: &str = "signature";

/// The document that gets signed for one capture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPayload {
    /// Capture time, Unix milliseconds.
    pub timestamp: u64,
    /// Base64 JPEG of the rectified left frame.
    #[serde(rename = "baseImage")]
    pub base_image: String,
    /// Base64 JPEG of the companion (right + depth) image.
    #[serde(rename = "depthImage")]
    pub depth_image: String,
    #[serde(rename = "depthData")]
    pub depth: DepthRecord,
}

/// Builds the canonical payload; both frames are JPEG-encoded at the fixed quality.
pub fn build(
    timestamp: u64,
    base_image: &Frame,
    companion_image: &Frame,
    depth: DepthRecord,
) -> Result<CanonicalPayload> {
    let base_jpeg = base_image.encode_jpeg().context("encode base image")?;
    let companion_jpeg = companion_image
        .encode_jpeg()
        .context("encode companion image")?;
    Ok(CanonicalPayload {
        timestamp,
        base_image: STANDARD.encode(base_jpeg),
        depth_image: STANDARD.encode(companion_jpeg),
        depth,
    })
}

impl CanonicalPayload {
    /// The exact bytes covered by the signature.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        to_canonical_bytes(self)
    }

    /// Canonical document plus the `signature` key, as uploaded to content storage.
    pub fn metadata_document(&self, signature: &str) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| anyhow!("payload did not serialize to an object"))?;
        object.insert(SIGNATURE_KEY.to_string(), Value::String(signature.to_string()));
        Ok(value)
    }

    pub fn base_image_jpeg(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.base_image)
            .context("decode base image base64")
    }

    pub fn depth_image_jpeg(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.depth_image)
            .context("decode depth image base64")
    }
}

/// Serializes any value into its canonical byte form.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let mut out = Vec::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(item, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::{encode, DisparityField};
    use serde_json::json;

    fn sample_payload() -> CanonicalPayload {
        let field = DisparityField::from_fn(4, 4, |r, c| if r == c { 2.5 } else { 0.0 }).unwrap();
        let left = Frame::filled(4, 4, [10, 20, 30]).unwrap();
        let companion = Frame::filled(8, 4, [200, 100, 0]).unwrap();
        build(1_700_000_000_000, &left, &companion, encode(&field)).unwrap()
    }

    #[test]
    fn keys_are_sorted_without_whitespace() {
        let bytes = to_canonical_bytes(&json!({"b": 1, "a": {"z": [1, 2], "y": "x"}})).unwrap();
        assert_eq!(bytes, br#"{"a":{"y":"x","z":[1,2]},"b":1}"#);
    }

    #[test]
    fn construction_order_does_not_matter() {
        let mut first = serde_json::Map::new();
        first.insert("timestamp".into(), json!(5));
        first.insert("baseImage".into(), json!("AA=="));
        let mut second = serde_json::Map::new();
        second.insert("baseImage".into(), json!("AA=="));
        second.insert("timestamp".into(), json!(5));
        assert_eq!(
            to_canonical_bytes(&Value::Object(first)).unwrap(),
            to_canonical_bytes(&Value::Object(second)).unwrap()
        );
    }

    #[test]
    fn payload_canonical_form_is_stable() {
        let a = sample_payload();
        let b = sample_payload();
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());

        let text = String::from_utf8(a.canonical_bytes().unwrap()).unwrap();
        assert!(text.starts_with(r#"{"baseImage":""#));
        assert!(text.contains(r#""depthData":{"dtype":"float32","indices_x":[0,1,2,3],"indices_y":[0,1,2,3],"max":2.5"#));
        assert!(text.ends_with(r#""timestamp":1700000000000}"#));
        assert!(!text.contains(' '));
    }

    #[test]
    fn reparsed_payload_reproduces_bytes() {
        let payload = sample_payload();
        let bytes = payload.canonical_bytes().unwrap();
        let reparsed: CanonicalPayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reparsed.canonical_bytes().unwrap(), bytes);
    }

    #[test]
    fn images_are_embedded_as_jpeg() {
        let payload = sample_payload();
        let jpeg = payload.base_image_jpeg().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&payload.depth_image_jpeg().unwrap()[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn metadata_document_appends_signature() {
        let payload = sample_payload();
        let doc = payload.metadata_document("0xabc").unwrap();
        assert_eq!(doc["signature"], "0xabc");
        assert_eq!(doc["timestamp"], 1_700_000_000_000u64);
    }
}
