//! Stereo frame sources.
//!
//! Sources produce synchronized `StereoPair`s at a nominal rate:
//! - `stub://` synthetic textured scene (testing, demos)
//! - a pair of local image files
//!
//! Acquisition runs on its own cadence; a capture only borrows the most recent pair.
//! Sources never write frames to disk themselves.

pub mod file;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::frame::StereoPair;

pub use file::FileStereoSource;
pub use synthetic::SyntheticStereoSource;

/// Camera acquisition settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceConfig {
    /// `stub://<name>` or a local image path.
    pub left: String,
    pub right: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            left: "stub://left".to_string(),
            right: "stub://right".to_string(),
            width: 640,
            height: 480,
            fps: 15,
        }
    }
}

impl SourceConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

/// A source of synchronized stereo pairs.
pub trait StereoSource: Send {
    fn connect(&mut self) -> Result<()>;

    fn next_pair(&mut self) -> Result<StereoPair>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub pairs_captured: u64,
    pub description: String,
}

/// Opens the source named by `config`. Both sides must use the same kind.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn StereoSource>> {
    match (is_stub(&config.left), is_stub(&config.right)) {
        (true, true) => Ok(Box::new(SyntheticStereoSource::new(
            config.width,
            config.height,
        )?)),
        (false, false) => Ok(Box::new(FileStereoSource::new(&config.left, &config.right)?)),
        _ => Err(anyhow!(
            "left and right sources must both be stub:// or both be files"
        )),
    }
}

fn is_stub(source: &str) -> bool {
    source.starts_with("stub://")
}

/// A connected source plus the latest pair and the left/right assignment.
pub struct StereoRig {
    source: Box<dyn StereoSource>,
    swapped: bool,
    latest: Option<StereoPair>,
}

impl StereoRig {
    pub fn new(mut source: Box<dyn StereoSource>) -> Result<Self> {
        source.connect()?;
        Ok(Self {
            source,
            swapped: false,
            latest: None,
        })
    }

    /// Pulls one pair from the source and keeps it as the latest.
    pub fn poll(&mut self) -> Result<&StereoPair> {
        let pair = self.source.next_pair()?;
        let pair = if self.swapped { pair.swapped() } else { pair };
        let latest: &StereoPair = self.latest.insert(pair);
        Ok(latest)
    }

    pub fn latest(&self) -> Option<&StereoPair> {
        self.latest.as_ref()
    }

    /// Swaps the left/right assignment for subsequent pairs.
    pub fn swap(&mut self) -> bool {
        self.swapped = !self.swapped;
        self.latest = self.latest.take().map(StereoPair::swapped);
        log::info!(
            "camera assignment swapped (left/right {})",
            if self.swapped { "reversed" } else { "normal" }
        );
        self.swapped
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped
    }

    pub fn is_healthy(&self) -> bool {
        self.source.is_healthy()
    }

    pub fn stats(&self) -> SourceStats {
        self.source.stats()
    }
}
