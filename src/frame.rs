//! Frame containers.
//!
//! - `Frame`: owned RGB8 pixels with dimensions.
//! - `StereoPair`: one synchronized left/right acquisition.
//!
//! JPEG encoding uses a fixed quality so that re-encoding identical pixels yields
//! identical bytes; the encoded images are embedded in the signed document.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{GenericImageView, RgbImage};
use std::path::Path;

/// JPEG quality used for every image that ends up in a capture artifact.
pub const JPEG_QUALITY: u8 = 95;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    /// Row-major RGB8, `width * height * 3` bytes.
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let count = (width as usize) * (height as usize);
        Self::new(width, height, rgb.repeat(count))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn same_size(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// BT.601 luma, one byte per pixel.
    pub fn luma(&self) -> Vec<u8> {
        self.pixels
            .chunks_exact(3)
            .map(|p| {
                let y = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        self.encode_jpeg_with_quality(JPEG_QUALITY)
    }

    pub fn encode_jpeg_with_quality(&self, quality: u8) -> Result<Vec<u8>> {
        let image = RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        encoder.encode_image(&image).context("encode jpeg")?;
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode image")?;
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_rgb8().into_raw())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image =
            image::open(path).with_context(|| format!("open image {}", path.display()))?;
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_rgb8().into_raw())
    }

    /// Places frames side by side. All frames must share the same height.
    pub fn hconcat(frames: &[&Frame]) -> Result<Frame> {
        let Some(first) = frames.first() else {
            return Err(anyhow!("hconcat needs at least one frame"));
        };
        let height = first.height;
        if frames.iter().any(|f| f.height != height) {
            return Err(anyhow!("hconcat frames must share the same height"));
        }
        let width: u32 = frames.iter().map(|f| f.width).sum();
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for row in 0..height as usize {
            for frame in frames {
                let stride = frame.width as usize * 3;
                pixels.extend_from_slice(&frame.pixels[row * stride..(row + 1) * stride]);
            }
        }
        Frame::new(width, height, pixels)
    }
}

/// One synchronized stereo acquisition.
#[derive(Clone, Debug)]
pub struct StereoPair {
    pub left: Frame,
    pub right: Frame,
}

impl StereoPair {
    pub fn new(left: Frame, right: Frame) -> Result<Self> {
        if !left.same_size(&right) {
            return Err(anyhow!(
                "stereo frames differ in size: left {}x{}, right {}x{}",
                left.width,
                left.height,
                right.width,
                right.height
            ));
        }
        Ok(Self { left, right })
    }

    pub fn swapped(self) -> Self {
        Self {
            left: self.right,
            right: self.left,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_length() {
        assert!(Frame::new(2, 2, vec![0; 11]).is_err());
    }

    #[test]
    fn jpeg_encoding_is_deterministic_and_decodable() {
        let frame = Frame::new(
            8,
            8,
            (0..8 * 8 * 3).map(|i| (i * 7 % 256) as u8).collect(),
        )
        .unwrap();
        let a = frame.encode_jpeg().unwrap();
        let b = frame.encode_jpeg().unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[..2], &[0xFF, 0xD8]);
        let decoded = Frame::decode(&a).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
    }

    #[test]
    fn hconcat_interleaves_rows() {
        let a = Frame::filled(1, 2, [1, 1, 1]).unwrap();
        let b = Frame::filled(2, 2, [2, 2, 2]).unwrap();
        let joined = Frame::hconcat(&[&a, &b]).unwrap();
        assert_eq!(joined.width(), 3);
        assert_eq!(
            joined.pixels(),
            &[1, 1, 1, 2, 2, 2, 2, 2, 2, 1, 1, 1, 2, 2, 2, 2, 2, 2]
        );
    }

    #[test]
    fn hconcat_rejects_height_mismatch() {
        let a = Frame::filled(1, 2, [0, 0, 0]).unwrap();
        let b = Frame::filled(1, 3, [0, 0, 0]).unwrap();
        assert!(Frame::hconcat(&[&a, &b]).is_err());
    }

    #[test]
    fn stereo_pair_requires_matching_sizes() {
        let a = Frame::filled(4, 4, [0, 0, 0]).unwrap();
        let b = Frame::filled(4, 3, [0, 0, 0]).unwrap();
        assert!(StereoPair::new(a, b).is_err());
    }

    #[test]
    fn luma_of_white_is_255() {
        let frame = Frame::filled(2, 1, [255, 255, 255]).unwrap();
        assert_eq!(frame.luma(), vec![255, 255]);
    }
}
