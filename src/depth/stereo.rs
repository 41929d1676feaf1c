//! Stereo engine boundary.
//!
//! The capture pipeline only needs "two rectified, same-size frames in, one disparity
//! field out". `StereoEngine` is that seam. `BlockMatchingEngine` is a plain SAD block
//! matcher on luma used by the daemon when no other engine is plugged in.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::DisparityField;
use crate::frame::StereoPair;

const DEFAULT_NUM_DISPARITIES: u32 = 96;
const DEFAULT_BLOCK_SIZE: u32 = 9;
const MAX_NUM_DISPARITIES: u32 = 512;

/// Disparity engine trait.
///
/// Implementations must treat the frames as read-only and return a field with the
/// frames' dimensions (rows = height, cols = width). Values `<= 0` mark unmeasured
/// pixels.
pub trait StereoEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Returns false when calibration/rectification state is missing.
    fn is_ready(&self) -> bool;

    fn compute_disparity(&mut self, pair: &StereoPair) -> Result<DisparityField>;
}

/// Stereo calibration parameters for the block matcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub min_disparity: u32,
    #[serde(default = "default_num_disparities")]
    pub num_disparities: u32,
    #[serde(default = "default_block_size")]
    pub block_size: u32,
}

fn default_num_disparities() -> u32 {
    DEFAULT_NUM_DISPARITIES
}

fn default_block_size() -> u32 {
    DEFAULT_BLOCK_SIZE
}

impl Calibration {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            min_disparity: 0,
            num_disparities: DEFAULT_NUM_DISPARITIES,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read calibration {}", path.display()))?;
        let calibration: Calibration = serde_json::from_str(&raw)
            .with_context(|| format!("parse calibration {}", path.display()))?;
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("calibration frame size must be non-zero"));
        }
        if self.num_disparities == 0 || self.num_disparities > MAX_NUM_DISPARITIES {
            return Err(anyhow!(
                "num_disparities must be within 1..={}",
                MAX_NUM_DISPARITIES
            ));
        }
        if self.block_size == 0 || self.block_size % 2 == 0 {
            return Err(anyhow!("block_size must be odd and positive"));
        }
        Ok(())
    }
}

/// Sum-of-absolute-differences block matcher.
pub struct BlockMatchingEngine {
    calibration: Option<Calibration>,
}

impl BlockMatchingEngine {
    pub fn new(calibration: Option<Calibration>) -> Self {
        Self { calibration }
    }

    /// Loads calibration from `path`; an unreadable file leaves the engine un-ready.
    pub fn from_path(path: &Path) -> Self {
        match Calibration::load(path) {
            Ok(calibration) => {
                log::info!(
                    "calibration loaded from {} ({}x{}, {} disparities)",
                    path.display(),
                    calibration.width,
                    calibration.height,
                    calibration.num_disparities
                );
                Self::new(Some(calibration))
            }
            Err(e) => {
                log::warn!("stereo engine not calibrated: {:#}", e);
                Self::new(None)
            }
        }
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }
}

impl StereoEngine for BlockMatchingEngine {
    fn name(&self) -> &'static str {
        "block-matching"
    }

    fn is_ready(&self) -> bool {
        self.calibration.is_some()
    }

    fn compute_disparity(&mut self, pair: &StereoPair) -> Result<DisparityField> {
        let calibration = self
            .calibration
            .as_ref()
            .ok_or_else(|| anyhow!("stereo engine has no calibration"))?;
        if pair.left.width() != calibration.width || pair.left.height() != calibration.height {
            return Err(anyhow!(
                "frame size {}x{} does not match calibration {}x{}",
                pair.left.width(),
                pair.left.height(),
                calibration.width,
                calibration.height
            ));
        }
        if !pair.left.same_size(&pair.right) {
            return Err(anyhow!("stereo frames differ in size"));
        }
        let width = pair.left.width() as usize;
        let height = pair.left.height() as usize;
        let values = match_blocks(
            &pair.left.luma(),
            &pair.right.luma(),
            width,
            height,
            calibration,
        );
        DisparityField::new(height, width, values)
    }
}

fn match_blocks(
    left: &[u8],
    right: &[u8],
    width: usize,
    height: usize,
    calibration: &Calibration,
) -> Vec<f32> {
    let half = (calibration.block_size / 2) as usize;
    let min_d = calibration.min_disparity as usize;
    let max_d = min_d + calibration.num_disparities as usize;
    let mut best_cost = vec![u64::MAX; width * height];
    let mut best_d = vec![0usize; width * height];
    let mut diff = vec![0u64; width * height];
    let iw = width + 1;
    let mut integral = vec![0u64; iw * (height + 1)];

    for d in min_d..max_d {
        if d + half >= width {
            break;
        }
        for y in 0..height {
            for x in 0..width {
                let i = y * width + x;
                diff[i] = if x >= d {
                    left[i].abs_diff(right[i - d]) as u64
                } else {
                    255
                };
            }
        }
        for y in 0..height {
            let mut row_sum = 0u64;
            for x in 0..width {
                row_sum += diff[y * width + x];
                integral[(y + 1) * iw + x + 1] = integral[y * iw + x + 1] + row_sum;
            }
        }
        for y in 0..height {
            let y0 = y.saturating_sub(half);
            let y1 = (y + half + 1).min(height);
            for x in (d + half)..width.saturating_sub(half) {
                let x0 = x - half;
                let x1 = x + half + 1;
                let cost = integral[y1 * iw + x1] + integral[y0 * iw + x0]
                    - integral[y0 * iw + x1]
                    - integral[y1 * iw + x0];
                let i = y * width + x;
                if cost < best_cost[i] {
                    best_cost[i] = cost;
                    best_d[i] = d;
                }
            }
        }
    }

    best_cost
        .iter()
        .zip(&best_d)
        .map(|(&cost, &d)| if cost == u64::MAX { 0.0 } else { d as f32 })
        .collect()
}
