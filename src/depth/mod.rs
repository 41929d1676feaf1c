//! Depth codec.
//!
//! Converts a dense disparity field into a `DepthRecord`: summary statistics plus a
//! sparse (row, col, value) encoding of every valid pixel. The record is embedded in
//! the signed capture document, so `encode` is pure and reproducible: identical input
//! always yields an identical record (and identical canonical bytes).
//!
//! A pixel is valid iff its value is finite and strictly greater than zero. The same
//! rule drives the sparse mask and the statistics; an all-invalid field yields empty
//! sparse arrays and zeroed statistics.

use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub mod format;
pub mod stereo;

pub use stereo::{BlockMatchingEngine, Calibration, StereoEngine};

/// Element type tag recorded in every depth record.
pub const DTYPE_FLOAT32: &str = "float32";

/// Largest accepted side length for a disparity field.
pub const MAX_FIELD_DIM: usize = 16_384;

/// Returns true when a disparity value counts as a measured pixel.
pub fn is_valid_disparity(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

/// Dense per-pixel disparity, row-major, as produced by the stereo engine.
#[derive(Clone, Debug, PartialEq)]
pub struct DisparityField {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl DisparityField {
    pub fn new(rows: usize, cols: usize, values: Vec<f32>) -> Result<Self> {
        if rows > MAX_FIELD_DIM || cols > MAX_FIELD_DIM {
            return Err(anyhow!(
                "disparity field {}x{} exceeds maximum dimension {}",
                rows,
                cols,
                MAX_FIELD_DIM
            ));
        }
        let expected = rows * cols;
        if values.len() != expected {
            return Err(anyhow!(
                "disparity field length mismatch: expected {}, got {}",
                expected,
                values.len()
            ));
        }
        Ok(Self { rows, cols, values })
    }

    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        Self::new(rows, cols, vec![0.0; rows * cols])
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f32) -> Result<Self> {
        let mut values = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                values.push(f(row, col));
            }
        }
        Self::new(rows, cols, values)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.values[row * self.cols + col])
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) -> Result<()> {
        if row >= self.rows || col >= self.cols {
            return Err(anyhow!(
                "pixel ({}, {}) outside {}x{} field",
                row,
                col,
                self.rows,
                self.cols
            ));
        }
        self.values[row * self.cols + col] = value;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Summary statistics plus sparse encoding of a disparity field.
///
/// Serialized field names are part of the signing contract and must not change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthRecord {
    /// `[rows, cols]`
    pub shape: [usize; 2],
    #[serde(rename = "dtype")]
    pub dtype_tag: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    #[serde(rename = "std")]
    pub stddev: f64,
    #[serde(rename = "valid_pixels")]
    pub valid_pixel_count: usize,
    #[serde(rename = "indices_y")]
    pub sparse_index_rows: Vec<u32>,
    #[serde(rename = "indices_x")]
    pub sparse_index_cols: Vec<u32>,
    #[serde(rename = "values")]
    pub sparse_values: Vec<f32>,
}

/// Encodes a disparity field into a depth record.
pub fn encode(field: &DisparityField) -> DepthRecord {
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for (index, &value) in field.values.iter().enumerate() {
        if is_valid_disparity(value) {
            rows.push((index / field.cols) as u32);
            cols.push((index % field.cols) as u32);
            values.push(value);
        }
    }
    let stats = Stats::over(&values);
    DepthRecord {
        shape: [field.rows, field.cols],
        dtype_tag: DTYPE_FLOAT32.to_string(),
        min: stats.min,
        max: stats.max,
        mean: stats.mean,
        stddev: stats.stddev,
        valid_pixel_count: values.len(),
        sparse_index_rows: rows,
        sparse_index_cols: cols,
        sparse_values: values,
    }
}

struct Stats {
    min: f64,
    max: f64,
    mean: f64,
    stddev: f64,
}

impl Stats {
    fn over(values: &[f32]) -> Self {
        if values.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                stddev: 0.0,
            };
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0f64;
        for &v in values {
            let v = v as f64;
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        let n = values.len() as f64;
        let mean = sum / n;
        let variance = values
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        Self {
            min,
            max,
            mean,
            stddev: variance.sqrt(),
        }
    }
}

impl DepthRecord {
    /// Checks the structural invariants of a record read from untrusted storage.
    pub fn validate(&self) -> Result<()> {
        let [rows, cols] = self.shape;
        if rows > MAX_FIELD_DIM || cols > MAX_FIELD_DIM {
            return Err(anyhow!("depth record shape {}x{} exceeds maximum", rows, cols));
        }
        let n = self.valid_pixel_count;
        if self.sparse_index_rows.len() != n
            || self.sparse_index_cols.len() != n
            || self.sparse_values.len() != n
        {
            return Err(anyhow!(
                "sparse arrays disagree with valid_pixels={} (rows={}, cols={}, values={})",
                n,
                self.sparse_index_rows.len(),
                self.sparse_index_cols.len(),
                self.sparse_values.len()
            ));
        }
        for i in 0..n {
            let (r, c) = (self.sparse_index_rows[i] as usize, self.sparse_index_cols[i] as usize);
            if r >= rows || c >= cols {
                return Err(anyhow!("sparse index ({}, {}) outside {}x{} field", r, c, rows, cols));
            }
            if !is_valid_disparity(self.sparse_values[i]) {
                return Err(anyhow!("sparse value at ({}, {}) is not a valid disparity", r, c));
            }
        }
        Ok(())
    }

    /// Rebuilds the dense field; pixels absent from the sparse set become 0.
    pub fn to_dense(&self) -> Result<DisparityField> {
        self.validate()?;
        let [rows, cols] = self.shape;
        let mut field = DisparityField::zeros(rows, cols)?;
        for ((&r, &c), &v) in self
            .sparse_index_rows
            .iter()
            .zip(&self.sparse_index_cols)
            .zip(&self.sparse_values)
        {
            field.set(r as usize, c as usize, v)?;
        }
        Ok(field)
    }

    /// Saturates for shapes that never passed `validate`.
    pub fn total_pixels(&self) -> usize {
        self.shape[0].saturating_mul(self.shape[1])
    }

    pub fn summary(&self, timestamp: u64) -> DepthSummary {
        DepthSummary {
            timestamp,
            shape: self.shape,
            dtype: self.dtype_tag.clone(),
            min: self.min,
            max: self.max,
            mean: self.mean,
            std: self.stddev,
            valid_pixels: self.valid_pixel_count,
            total_pixels: self.total_pixels(),
        }
    }
}

/// Human-readable depth summary, persisted as `depth_meta_<ts>.json` and sent to the
/// registration service as the depth metadata fallback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthSummary {
    pub timestamp: u64,
    pub shape: [usize; 2],
    pub dtype: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub valid_pixels: usize,
    pub total_pixels: usize,
}

impl DepthSummary {
    pub fn valid_fraction(&self) -> f64 {
        if self.total_pixels == 0 {
            0.0
        } else {
            self.valid_pixels as f64 / self.total_pixels as f64
        }
    }
}

impl fmt::Display for DepthSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "depth capture {}", self.timestamp)?;
        writeln!(f, "  shape:        {:?}", self.shape)?;
        writeln!(f, "  dtype:        {}", self.dtype)?;
        writeln!(f, "  value range:  [{:.2}, {:.2}]", self.min, self.max)?;
        writeln!(f, "  mean:         {:.2}", self.mean)?;
        writeln!(f, "  std dev:      {:.2}", self.std)?;
        write!(
            f,
            "  valid pixels: {} / {} ({:.1}%)",
            self.valid_pixels,
            self.total_pixels,
            self.valid_fraction() * 100.0
        )
    }
}

/// Renders a disparity field as a grayscale RGB frame (invalid pixels black).
pub fn visualize(field: &DisparityField) -> Result<Frame> {
    let (lo, hi) = field
        .values
        .iter()
        .copied()
        .filter(|&v| is_valid_disparity(v))
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let span = (hi - lo).max(0.0) + 1e-5;
    let mut pixels = Vec::with_capacity(field.len() * 3);
    for &v in &field.values {
        let level = if is_valid_disparity(v) {
            (((v - lo) / span) * 254.0 + 1.0).clamp(1.0, 255.0) as u8
        } else {
            0
        };
        pixels.extend_from_slice(&[level, level, level]);
    }
    Frame::new(field.cols as u32, field.rows as u32, pixels)
}
