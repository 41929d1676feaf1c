//! Capture-level error taxonomy.

use std::path::PathBuf;

use thiserror::Error;

use crate::publish::PublishError;

/// Errors surfaced by the capture pipeline and the local artifact store.
///
/// Signing faults are deliberately absent: they degrade to a sentinel signature
/// (see [`crate::crypto::CaptureSignature`]) and never abort a capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Missing key material, calibration, or an invalid option.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A local artifact could not be decoded.
    #[error("malformed artifact {}: {reason}", path.display())]
    Codec { path: PathBuf, reason: String },

    /// The stereo engine failed to produce a disparity field.
    #[error("depth computation failed: {0}")]
    Depth(String),

    /// Payload construction (image encoding, serialization) failed.
    #[error("payload build failed: {0}")]
    Payload(String),

    /// A publish stage failed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Local filesystem failure while persisting an artifact.
    #[error("artifact io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    pub fn codec(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        CaptureError::Codec {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaptureError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
