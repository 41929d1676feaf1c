//! Local artifact store.
//!
//! Every artifact of a capture is named from the capture timestamp so the files of one
//! capture can be correlated later. Timestamps are unique per process, so no two
//! writers ever target the same file and no locking is needed. Writes go through a
//! temp file, `sync_all` and rename, so a crash never leaves a half-written artifact
//! under its final name.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::crypto::SignedCapture;
use crate::depth::format::{decode_depth_data, encode_depth_data};
use crate::depth::{DepthSummary, DisparityField};
use crate::error::{CaptureError, Result};
use crate::publish::PublishResult;

/// Kinds of files written per capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Original left frame, JPEG.
    LeftImage,
    /// Companion image (right frame + depth visualization), JPEG.
    ViewsImage,
    /// Dense disparity field, binary.
    DepthData,
    /// Depth summary, JSON.
    DepthMeta,
    /// Canonical payload + signature, JSON.
    SignedCapture,
    /// Publish result, JSON.
    PublishResult,
}

impl ArtifactKind {
    pub fn file_name(self, timestamp: u64) -> String {
        match self {
            ArtifactKind::LeftImage => format!("capture_{}_left.jpg", timestamp),
            ArtifactKind::ViewsImage => format!("capture_{}_views.jpg", timestamp),
            ArtifactKind::DepthData => format!("depth_data_{}.bin", timestamp),
            ArtifactKind::DepthMeta => format!("depth_meta_{}.json", timestamp),
            ArtifactKind::SignedCapture => format!("capture_{}_signed.json", timestamp),
            ArtifactKind::PublishResult => format!("ip_registration_{}.json", timestamp),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Opens (creating if needed) the artifact directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CaptureError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, kind: ArtifactKind, timestamp: u64) -> PathBuf {
        self.root.join(kind.file_name(timestamp))
    }

    pub fn exists(&self, kind: ArtifactKind, timestamp: u64) -> bool {
        self.path(kind, timestamp).is_file()
    }

    pub fn write_left_image(&self, timestamp: u64, jpeg: &[u8]) -> Result<PathBuf> {
        self.write_bytes(ArtifactKind::LeftImage, timestamp, jpeg)
    }

    pub fn write_views_image(&self, timestamp: u64, jpeg: &[u8]) -> Result<PathBuf> {
        self.write_bytes(ArtifactKind::ViewsImage, timestamp, jpeg)
    }

    pub fn write_depth_data(&self, timestamp: u64, field: &DisparityField) -> Result<PathBuf> {
        self.write_bytes(ArtifactKind::DepthData, timestamp, &encode_depth_data(field))
    }

    pub fn write_depth_meta(&self, timestamp: u64, summary: &DepthSummary) -> Result<PathBuf> {
        self.write_json(ArtifactKind::DepthMeta, timestamp, summary)
    }

    pub fn write_signed_capture(&self, timestamp: u64, capture: &SignedCapture) -> Result<PathBuf> {
        self.write_json(ArtifactKind::SignedCapture, timestamp, capture)
    }

    pub fn write_publish_result(&self, timestamp: u64, result: &PublishResult) -> Result<PathBuf> {
        self.write_json(ArtifactKind::PublishResult, timestamp, result)
    }

    pub fn read_left_image(&self, timestamp: u64) -> Result<Vec<u8>> {
        let path = self.path(ArtifactKind::LeftImage, timestamp);
        fs::read(&path).map_err(|e| CaptureError::io(&path, e))
    }

    pub fn read_depth_data(&self, timestamp: u64) -> Result<DisparityField> {
        let path = self.path(ArtifactKind::DepthData, timestamp);
        let bytes = fs::read(&path).map_err(|e| CaptureError::io(&path, e))?;
        decode_depth_data(&bytes).map_err(|e| CaptureError::codec(&path, format!("{:#}", e)))
    }

    pub fn read_depth_meta(&self, timestamp: u64) -> Result<DepthSummary> {
        read_json(&self.path(ArtifactKind::DepthMeta, timestamp))
    }

    pub fn read_signed_capture(&self, timestamp: u64) -> Result<SignedCapture> {
        read_signed_capture_file(&self.path(ArtifactKind::SignedCapture, timestamp))
    }

    pub fn read_publish_result(&self, timestamp: u64) -> Result<PublishResult> {
        read_json(&self.path(ArtifactKind::PublishResult, timestamp))
    }

    /// Timestamps of every signed capture in the store, ascending.
    pub fn list_captures(&self) -> Result<Vec<u64>> {
        let entries = fs::read_dir(&self.root).map_err(|e| CaptureError::io(&self.root, e))?;
        let mut timestamps = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CaptureError::io(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(ts) = name
                .strip_prefix("capture_")
                .and_then(|rest| rest.strip_suffix("_signed.json"))
                .and_then(|ts| ts.parse::<u64>().ok())
            {
                timestamps.push(ts);
            }
        }
        timestamps.sort_unstable();
        Ok(timestamps)
    }

    fn write_json<T: Serialize>(
        &self,
        kind: ArtifactKind,
        timestamp: u64,
        value: &T,
    ) -> Result<PathBuf> {
        let path = self.path(kind, timestamp);
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| CaptureError::codec(&path, format!("serialize: {}", e)))?;
        write_atomic(&path, &bytes)?;
        log::debug!("wrote {}", path.display());
        Ok(path)
    }

    fn write_bytes(&self, kind: ArtifactKind, timestamp: u64, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(kind, timestamp);
        write_atomic(&path, bytes)?;
        log::debug!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

/// Reads a signed capture artifact from an arbitrary path.
/// Reads a signed capture and checks its embedded depth record.
pub fn read_signed_capture_file(path: &Path) -> Result<SignedCapture> {
    let capture: SignedCapture = read_json(path)?;
    capture
        .data
        .depth
        .validate()
        .map_err(|e| CaptureError::codec(path, format!("depth record: {:#}", e)))?;
    Ok(capture)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| CaptureError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| CaptureError::codec(path, e))
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    {
        let mut file = File::create(&tmp_path).map_err(|e| CaptureError::io(&tmp_path, e))?;
        file.write_all(data)
            .and_then(|_| file.sync_all())
            .map_err(|e| CaptureError::io(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| CaptureError::io(path, e))?;
    Ok(())
}
