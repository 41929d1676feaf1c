//! Depth Witness
//!
//! Captures synchronized stereo frames on an edge device, derives a depth map, signs
//! the capture as a provenance witness and publishes it in two stages: content
//! storage, then on-chain asset registration.
//!
//! # Pipeline
//!
//! 1. **Depth codec** (`depth`): disparity field to a sparse, summarized `DepthRecord`.
//! 2. **Canonical payload** (`payload`): images + depth record in a single canonical
//!    byte form (sorted keys, no whitespace). This byte form is the signing contract.
//! 3. **Signer** (`crypto`): EIP-191 personal-sign over the canonical bytes with the
//!    device's secp256k1 key. A missing or broken key degrades to a sentinel.
//! 4. **Publisher** (`publish`): storage upload, then registration. A storage failure
//!    stops the publish; a registration failure only degrades it.
//! 5. **Capture session** (`session`): runs one trigger through the stages and
//!    persists every artifact (`storage`) before the next stage can fail.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames, stereo pairs, JPEG encoding
//! - `ingest`: stereo sources (`stub://`, image files)
//! - `config`: JSON config file + environment overrides
//! - `ui`: stderr stage spinners for the command-line tools

pub mod config;
pub mod crypto;
pub mod depth;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod payload;
pub mod publish;
pub mod session;
pub mod storage;
pub mod ui;

pub use config::WitnessConfig;
pub use crypto::{
    recover_signer, sign, sign_capture, verify_capture, Address, CaptureSignature, DeviceKey,
    SignedCapture,
};
pub use depth::{
    encode, BlockMatchingEngine, Calibration, DepthRecord, DepthSummary, DisparityField,
    StereoEngine,
};
pub use error::CaptureError;
pub use frame::{Frame, StereoPair};
pub use ingest::{StereoRig, StereoSource};
pub use payload::{build, CanonicalPayload};
pub use publish::{
    PublishError, PublishOutcome, PublishResult, Publisher, RegistrationService, StorageService,
};
pub use session::{
    CaptureController, CaptureReport, CaptureSession, CaptureState, CaptureStatus,
};
pub use storage::{ArtifactKind, ArtifactStore};
