//! Synthetic stereo source (`stub://`).
//!
//! Renders a textured scene twice, the right view shifted horizontally so that a block
//! matcher recovers a known disparity: `BACKGROUND_DISPARITY` everywhere except a
//! centered box at `FOREGROUND_DISPARITY`.

use anyhow::{anyhow, Result};

use super::{SourceStats, StereoSource};
use crate::frame::{Frame, StereoPair};

pub const BACKGROUND_DISPARITY: u32 = 8;
pub const FOREGROUND_DISPARITY: u32 = 20;

pub struct SyntheticStereoSource {
    width: u32,
    height: u32,
    frame_count: u64,
    connected: bool,
}

impl SyntheticStereoSource {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic source needs a non-zero frame size"));
        }
        Ok(Self {
            width,
            height,
            frame_count: 0,
            connected: false,
        })
    }

    fn in_foreground(&self, x: u32, y: u32) -> bool {
        let (w, h) = (self.width, self.height);
        x >= w * 3 / 8 && x < w * 5 / 8 && y >= h / 3 && y < h * 2 / 3
    }

    fn render(&self, right_view: bool) -> Result<Frame> {
        let drift = (self.frame_count % 64) as u32;
        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                let shift = if !right_view {
                    0
                } else if self.in_foreground(x, y) {
                    FOREGROUND_DISPARITY
                } else {
                    BACKGROUND_DISPARITY
                };
                let v = texture(x + shift + drift, y);
                pixels.extend_from_slice(&[v, v / 2 + 64, 255 - v]);
            }
        }
        Frame::new(self.width, self.height, pixels)
    }
}

/// Left view sees `texture(x)`; the right view at `x` sees `texture(x + d)`.
fn texture(sx: u32, y: u32) -> u8 {
    let sx = sx as u64;
    let y = y as u64;
    ((sx * 37 + y * 11) ^ (sx * sx / 3)) as u8
}

impl StereoSource for SyntheticStereoSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticStereoSource: connected ({}x{})",
            self.width,
            self.height
        );
        self.connected = true;
        Ok(())
    }

    fn next_pair(&mut self) -> Result<StereoPair> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        self.frame_count += 1;
        StereoPair::new(self.render(false)?, self.render(true)?)
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            pairs_captured: self.frame_count,
            description: format!("stub:// {}x{}", self.width, self.height),
        }
    }
}
