//! Local image-pair source.
//!
//! Reads a left and right image file on every pull, so an external grabber can keep
//! overwriting them. Only local paths are accepted.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

use super::{SourceStats, StereoSource};
use crate::frame::{Frame, StereoPair};

pub struct FileStereoSource {
    left: PathBuf,
    right: PathBuf,
    pair_count: u64,
    last_error: Option<String>,
}

impl FileStereoSource {
    pub fn new(left: &str, right: &str) -> Result<Self> {
        Ok(Self {
            left: local_path(left)?,
            right: local_path(right)?,
            pair_count: 0,
            last_error: None,
        })
    }

    fn read_pair(&self) -> Result<StereoPair> {
        let left = Frame::open(&self.left)
            .with_context(|| format!("read left frame {}", self.left.display()))?;
        let right = Frame::open(&self.right)
            .with_context(|| format!("read right frame {}", self.right.display()))?;
        StereoPair::new(left, right)
    }
}

fn local_path(source: &str) -> Result<PathBuf> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("image source path is empty"));
    }
    let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    if path.contains("://") {
        return Err(anyhow!(
            "image sources only support local paths (got {})",
            source
        ));
    }
    Ok(PathBuf::from(path))
}

impl StereoSource for FileStereoSource {
    fn connect(&mut self) -> Result<()> {
        for path in [&self.left, &self.right] {
            if !path.is_file() {
                return Err(anyhow!("image source {} does not exist", path.display()));
            }
        }
        log::info!(
            "FileStereoSource: connected to {} / {}",
            self.left.display(),
            self.right.display()
        );
        Ok(())
    }

    fn next_pair(&mut self) -> Result<StereoPair> {
        match self.read_pair() {
            Ok(pair) => {
                self.pair_count += 1;
                self.last_error = None;
                Ok(pair)
            }
            Err(e) => {
                self.last_error = Some(format!("{:#}", e));
                Err(e)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            pairs_captured: self.pair_count,
            description: format!("{} / {}", self.left.display(), self.right.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_remote_urls() {
        assert!(FileStereoSource::new("http://cam/left.jpg", "right.jpg").is_err());
        assert!(FileStereoSource::new("file:///tmp/l.png", "/tmp/r.png").is_ok());
    }

    #[test]
    fn reads_image_pair_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let left = dir.path().join("left.jpg");
        let right = dir.path().join("right.jpg");
        let frame = Frame::filled(12, 6, [90, 120, 150]).unwrap();
        std::fs::write(&left, frame.encode_jpeg().unwrap()).unwrap();
        std::fs::write(&right, frame.encode_jpeg().unwrap()).unwrap();

        let mut source =
            FileStereoSource::new(left.to_str().unwrap(), right.to_str().unwrap()).unwrap();
        source.connect().unwrap();
        let pair = source.next_pair().unwrap();
        assert_eq!((pair.left.width(), pair.left.height()), (12, 6));
        assert!(source.is_healthy());

        std::fs::remove_file(&right).unwrap();
        assert!(source.next_pair().is_err());
        assert!(!source.is_healthy());
    }

    #[test]
    fn connect_fails_for_missing_files() {
        let mut source = FileStereoSource::new("/nonexistent/l.png", "/nonexistent/r.png").unwrap();
        assert!(source.connect().is_err());
    }
}
