//! Two-stage publisher: content storage, then asset registration.
//!
//! Stage one uploads the original JPEG and the signed metadata document. Only when it
//! returns a usable content identifier does stage two register the asset. A storage
//! failure ends the publish; a registration failure degrades it but keeps the storage
//! receipt. Each call is a single attempt with no implicit retries.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::crypto::SignedCapture;
use crate::depth::DepthSummary;
use crate::payload::to_canonical_bytes;

pub mod error;
pub mod http;

pub use error::{PublishError, Stage};
pub use http::{HttpRegistrationClient, HttpStorageClient, RegistrationCheck};

pub const DEFAULT_MINTING_FEE: &str = "0.1";
pub const DEFAULT_COMMERCIAL_REV_SHARE: u8 = 10;

/// Response of the storage service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageReceipt {
    pub cid: String,
    #[serde(default)]
    pub metadata_cid: Option<String>,
    #[serde(default)]
    pub gateway_url: Option<String>,
}

/// Body of the registration call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub image_cid: String,
    pub metadata_cid: Option<String>,
    pub depth_metadata: DepthSummary,
    pub device_address: String,
    pub minting_fee: String,
    pub commercial_rev_share: u8,
}

/// Identifiers returned by a successful registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReceipt {
    pub ip_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub token_id: String,
    pub tx_hash: String,
    #[serde(default)]
    pub nft_contract: Option<String>,
    #[serde(default)]
    pub explorer_url: Option<String>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Commercial terms attached to every registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationTerms {
    pub minting_fee: String,
    pub commercial_rev_share: u8,
}

impl Default for RegistrationTerms {
    fn default() -> Self {
        Self {
            minting_fee: DEFAULT_MINTING_FEE.to_string(),
            commercial_rev_share: DEFAULT_COMMERCIAL_REV_SHARE,
        }
    }
}

/// What a publish achieved. Persisted as `ip_registration_<ts>.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub storage_id: String,
    pub metadata_id: Option<String>,
    pub storage_url: Option<String>,
    pub registration: Option<RegistrationReceipt>,
    /// Why registration did not happen, when it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_error: Option<String>,
}

impl PublishResult {
    pub fn from_storage(receipt: StorageReceipt) -> Self {
        Self {
            storage_id: receipt.cid,
            metadata_id: receipt.metadata_cid,
            storage_url: receipt.gateway_url,
            registration: None,
            registration_error: None,
        }
    }

    pub fn registration_id(&self) -> Option<&str> {
        self.registration.as_ref().map(|r| r.ip_id.as_str())
    }
}

/// Tagged outcome of one publish attempt.
#[derive(Debug)]
pub enum PublishOutcome {
    /// Both stages succeeded.
    Published(PublishResult),
    /// Content is stored but registration failed; recoverable.
    RegistrationDegraded {
        result: PublishResult,
        reason: PublishError,
    },
    /// Storage failed; registration was never attempted.
    StorageFailed(PublishError),
}

impl PublishOutcome {
    pub fn result(&self) -> Option<&PublishResult> {
        match self {
            PublishOutcome::Published(result)
            | PublishOutcome::RegistrationDegraded { result, .. } => Some(result),
            PublishOutcome::StorageFailed(_) => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, PublishOutcome::RegistrationDegraded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            PublishOutcome::Published(_) => "published",
            PublishOutcome::RegistrationDegraded { .. } => "registration-degraded",
            PublishOutcome::StorageFailed(_) => "storage-failed",
        }
    }
}

/// Content storage seam.
pub trait StorageService: Send {
    fn endpoint(&self) -> &str;

    fn upload(
        &self,
        image_jpeg: &[u8],
        metadata_json: &str,
        device_address: &str,
    ) -> Result<StorageReceipt, PublishError>;
}

/// Asset registration seam.
pub trait RegistrationService: Send {
    fn endpoint(&self) -> &str;

    fn register(&self, request: &RegistrationRequest) -> Result<RegistrationReceipt, PublishError>;
}

impl<T: StorageService + ?Sized> StorageService for Box<T> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    fn upload(
        &self,
        image_jpeg: &[u8],
        metadata_json: &str,
        device_address: &str,
    ) -> Result<StorageReceipt, PublishError> {
        (**self).upload(image_jpeg, metadata_json, device_address)
    }
}

impl<T: RegistrationService + ?Sized> RegistrationService for Box<T> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    fn register(&self, request: &RegistrationRequest) -> Result<RegistrationReceipt, PublishError> {
        (**self).register(request)
    }
}

pub struct Publisher<S, R> {
    storage: S,
    registration: R,
    terms: RegistrationTerms,
}

impl<S: StorageService, R: RegistrationService> Publisher<S, R> {
    pub fn new(storage: S, registration: R, terms: RegistrationTerms) -> Self {
        Self {
            storage,
            registration,
            terms,
        }
    }

    pub fn storage_endpoint(&self) -> &str {
        self.storage.endpoint()
    }

    pub fn registration_endpoint(&self) -> &str {
        self.registration.endpoint()
    }

    pub fn terms(&self) -> &RegistrationTerms {
        &self.terms
    }

    /// Runs the storage stage; on success chains the registration stage.
    pub fn publish(
        &self,
        capture: &SignedCapture,
        original_image_jpeg: &[u8],
        device_address: &str,
    ) -> PublishOutcome {
        self.publish_with(capture, original_image_jpeg, device_address, &mut |_| {})
    }

    /// Like [`Publisher::publish`], calling `on_stage` as each stage starts.
    pub fn publish_with(
        &self,
        capture: &SignedCapture,
        original_image_jpeg: &[u8],
        device_address: &str,
        on_stage: &mut dyn FnMut(Stage),
    ) -> PublishOutcome {
        on_stage(Stage::Storage);
        let receipt = match self.store(capture, original_image_jpeg, device_address) {
            Ok(receipt) => receipt,
            Err(e) => {
                log::error!("{}", e);
                return PublishOutcome::StorageFailed(e);
            }
        };
        log::info!(
            "storage stage: stored cid={} metadata_cid={}",
            receipt.cid,
            receipt.metadata_cid.as_deref().unwrap_or("-")
        );
        let summary = capture.data.depth.summary(capture.data.timestamp);
        let mut result = PublishResult::from_storage(receipt);
        on_stage(Stage::Registration);
        match self.register(&result, summary, device_address) {
            Ok(registration) => {
                log::info!(
                    "registration stage: ip_id={} tx={}",
                    registration.ip_id,
                    registration.tx_hash
                );
                result.registration = Some(registration);
                PublishOutcome::Published(result)
            }
            Err(reason) => {
                log::warn!("{}; capture stays stored as {}", reason, result.storage_id);
                result.registration_error = Some(reason.to_string());
                PublishOutcome::RegistrationDegraded { result, reason }
            }
        }
    }

    /// Storage stage only.
    pub fn store(
        &self,
        capture: &SignedCapture,
        original_image_jpeg: &[u8],
        device_address: &str,
    ) -> Result<StorageReceipt, PublishError> {
        let metadata = capture
            .metadata_document()
            .and_then(|doc| to_canonical_bytes(&doc))
            .and_then(|bytes| String::from_utf8(bytes).map_err(anyhow::Error::from))
            .map_err(|e| {
                PublishError::invalid(
                    Stage::Storage,
                    self.storage.endpoint(),
                    format!("metadata document could not be serialized: {:#}", e),
                )
            })?;
        self.storage
            .upload(original_image_jpeg, &metadata, device_address)
    }

    /// Registration stage for content already in storage. Used directly to retry a
    /// degraded publish without re-uploading.
    pub fn register(
        &self,
        stored: &PublishResult,
        depth_metadata: DepthSummary,
        device_address: &str,
    ) -> Result<RegistrationReceipt, PublishError> {
        let request = RegistrationRequest {
            image_cid: stored.storage_id.clone(),
            metadata_cid: stored.metadata_id.clone(),
            depth_metadata,
            device_address: device_address.to_string(),
            minting_fee: self.terms.minting_fee.clone(),
            commercial_rev_share: self.terms.commercial_rev_share,
        };
        self.registration.register(&request)
    }
}
