//! Shared types for the scalefit resampling pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::BackendError;
use crate::kernel::Kernel;

/// Re-export `GrayImage` so downstream crates can hand decoded source and
/// reference images to the pipeline without depending on `image` directly.
pub use image::GrayImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of a decoded grayscale image.
    #[must_use]
    pub fn of(image: &GrayImage) -> Self {
        Self::new(image.width(), image.height())
    }

    /// Total pixel count (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single-channel floating-point image, row-major.
///
/// This is what a render backend hands back after a read-back: samples
/// are already in normalized `[0, 1]` space (modulo kernel overshoot),
/// so comparison reads them without rescaling.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatImage {
    dimensions: Dimensions,
    data: Vec<f32>,
}

impl FloatImage {
    /// Wrap row-major samples.
    ///
    /// Returns `None` if `data.len()` does not equal `width * height`.
    #[must_use]
    pub fn from_raw(dimensions: Dimensions, data: Vec<f32>) -> Option<Self> {
        let expected = usize::try_from(dimensions.pixel_count()).ok()?;
        (data.len() == expected).then_some(Self { dimensions, data })
    }

    /// An image filled with a single value.
    #[must_use]
    pub fn from_pixel(dimensions: Dimensions, value: f32) -> Self {
        let len = usize::try_from(dimensions.pixel_count()).unwrap_or(0);
        Self {
            dimensions,
            data: vec![value; len],
        }
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    #[must_use]
    pub fn from_fn(dimensions: Dimensions, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let mut data = Vec::with_capacity(usize::try_from(dimensions.pixel_count()).unwrap_or(0));
        for y in 0..dimensions.height {
            for x in 0..dimensions.width {
                data.push(f(x, y));
            }
        }
        Self { dimensions, data }
    }

    /// Convert 8-bit samples to normalized floats (`value / 255`).
    #[must_use]
    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            dimensions: Dimensions::of(image),
            data: image
                .as_raw()
                .iter()
                .map(|&v| f32::from(v) / 255.0)
                .collect(),
        }
    }

    /// Quantize back to 8 bits, clamping out-of-range samples.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_gray(&self) -> GrayImage {
        let raw = self
            .data
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        GrayImage::from_raw(self.dimensions.width, self.dimensions.height, raw)
            .unwrap_or_else(|| GrayImage::new(self.dimensions.width, self.dimensions.height))
    }

    /// Image dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.dimensions.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.dimensions.height
    }

    /// Sample at `(x, y)`. Out-of-range coordinates read as `0.0`.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return 0.0;
        }
        let index = y as usize * self.dimensions.width as usize + x as usize;
        self.data.get(index).copied().unwrap_or(0.0)
    }

    /// Sample at a signed coordinate, clamped to the image edge.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn get_clamped(&self, x: i64, y: i64) -> f32 {
        let max_x = i64::from(self.dimensions.width.saturating_sub(1));
        let max_y = i64::from(self.dimensions.height.saturating_sub(1));
        self.get(x.clamp(0, max_x) as u32, y.clamp(0, max_y) as u32)
    }

    /// Row-major samples.
    #[must_use]
    pub fn as_raw(&self) -> &[f32] {
        &self.data
    }
}

/// Separable versus non-separable resampling.
///
/// Selected once per run and never changed mid-sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterMode {
    /// Two 1-D passes, vertical then horizontal (sinc-based kernels).
    #[default]
    Orthogonal,
    /// One 2-D radially symmetric pass (jinc-based kernels).
    Cylindrical,
}

impl FilterMode {
    /// Map a command-line index to a mode: `0` is orthogonal, anything
    /// above is cylindrical, anything below is orthogonal.
    #[must_use]
    pub const fn from_index_clamped(index: i64) -> Self {
        if index >= 1 {
            Self::Cylindrical
        } else {
            Self::Orthogonal
        }
    }

    /// Number of resampling passes this mode runs (excluding
    /// linearization passes).
    #[must_use]
    pub const fn resample_pass_count(self) -> usize {
        match self {
            Self::Orthogonal => 2,
            Self::Cylindrical => 1,
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Orthogonal => f.write_str("Orthogonal"),
            Self::Cylindrical => f.write_str("Cylindrical"),
        }
    }
}

/// Kernel selection plus the numeric parameters for one render.
///
/// Rebuilt by the sweep for every grid point; a render only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelParameters {
    /// Which kernel function the resampling passes evaluate.
    pub kernel: Kernel,
    /// Kernel support radius in source pixels (`> 0`).
    pub radius: f32,
    /// Blur factor applied to the kernel argument (`> 0`).
    pub blur: f32,
    /// First free kernel parameter.
    pub p1: f32,
    /// Second free kernel parameter.
    pub p2: f32,
    /// Antiringing strength in `[0, 1]`. Only honoured when upscaling.
    pub antiringing: f32,
}

impl Default for KernelParameters {
    fn default() -> Self {
        Self {
            kernel: Kernel::default(),
            radius: 2.0,
            blur: 1.0,
            p1: 0.0,
            p2: 0.0,
            antiringing: 1.0,
        }
    }
}

/// Errors that can occur while loading images, rendering, or scoring.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode an input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The decoded image is not single-channel grayscale.
    #[error("image has to be 1 channel greyscale, got {channels} channels")]
    UnsupportedChannels {
        /// Channel count of the decoded image.
        channels: u8,
    },

    /// Sweep or pipeline configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The render backend failed to allocate, draw, or read back.
    #[error("render backend failure: {0}")]
    Backend(#[from] BackendError),

    /// The rendered result does not match the reference resolution.
    #[error("rendered image is {actual} but the reference is {expected}")]
    DimensionMismatch {
        /// Reference dimensions.
        expected: Dimensions,
        /// Rendered dimensions.
        actual: Dimensions,
    },

    /// `compare` was called before any render produced a result.
    #[error("no rendered image to compare; call resample first")]
    NothingRendered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_display() {
        assert_eq!(Dimensions::new(640, 480).to_string(), "640x480");
    }

    #[test]
    fn dimensions_pixel_count_does_not_overflow() {
        let d = Dimensions::new(u32::MAX, 2);
        assert_eq!(d.pixel_count(), u64::from(u32::MAX) * 2);
    }

    #[test]
    fn dimensions_is_empty() {
        assert!(Dimensions::new(0, 10).is_empty());
        assert!(Dimensions::new(10, 0).is_empty());
        assert!(!Dimensions::new(1, 1).is_empty());
    }

    #[test]
    fn float_image_from_raw_rejects_wrong_length() {
        assert!(FloatImage::from_raw(Dimensions::new(2, 2), vec![0.0; 3]).is_none());
        assert!(FloatImage::from_raw(Dimensions::new(2, 2), vec![0.0; 4]).is_some());
    }

    #[test]
    fn float_image_from_gray_normalizes() {
        let gray = GrayImage::from_raw(2, 1, vec![0, 255]).unwrap_or_default();
        let img = FloatImage::from_gray(&gray);
        assert!((img.get(0, 0) - 0.0).abs() < f32::EPSILON);
        assert!((img.get(1, 0) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn float_image_to_gray_clamps_overshoot() {
        let img = FloatImage::from_raw(Dimensions::new(3, 1), vec![-0.2, 0.5, 1.3]).unwrap_or_else(
            || FloatImage::from_pixel(Dimensions::new(3, 1), 0.0),
        );
        let gray = img.to_gray();
        assert_eq!(gray.as_raw(), &vec![0, 128, 255]);
    }

    #[test]
    fn float_image_get_clamped_repeats_edges() {
        let img = FloatImage::from_fn(Dimensions::new(3, 2), |x, y| (x + 10 * y) as f32);
        assert!((img.get_clamped(-5, 0) - 0.0).abs() < f32::EPSILON);
        assert!((img.get_clamped(7, 0) - 2.0).abs() < f32::EPSILON);
        assert!((img.get_clamped(1, 9) - 11.0).abs() < f32::EPSILON);
    }

    #[test]
    fn float_image_get_out_of_range_reads_zero() {
        let img = FloatImage::from_pixel(Dimensions::new(2, 2), 0.7);
        assert!((img.get(2, 0)).abs() < f32::EPSILON);
    }

    #[test]
    fn filter_mode_from_index_clamps() {
        assert_eq!(FilterMode::from_index_clamped(-3), FilterMode::Orthogonal);
        assert_eq!(FilterMode::from_index_clamped(0), FilterMode::Orthogonal);
        assert_eq!(FilterMode::from_index_clamped(1), FilterMode::Cylindrical);
        assert_eq!(FilterMode::from_index_clamped(9), FilterMode::Cylindrical);
    }

    #[test]
    fn filter_mode_pass_counts() {
        assert_eq!(FilterMode::Orthogonal.resample_pass_count(), 2);
        assert_eq!(FilterMode::Cylindrical.resample_pass_count(), 1);
    }

    #[test]
    fn error_unsupported_channels_display() {
        let err = PipelineError::UnsupportedChannels { channels: 3 };
        assert_eq!(
            err.to_string(),
            "image has to be 1 channel greyscale, got 3 channels",
        );
    }

    #[test]
    fn error_dimension_mismatch_display() {
        let err = PipelineError::DimensionMismatch {
            expected: Dimensions::new(8, 8),
            actual: Dimensions::new(4, 8),
        };
        assert_eq!(
            err.to_string(),
            "rendered image is 4x8 but the reference is 8x8",
        );
    }

    #[test]
    fn kernel_parameters_default_matches_cli_defaults() {
        let p = KernelParameters::default();
        assert_eq!(p.kernel, Kernel::Lanczos);
        assert!((p.radius - 2.0).abs() < f32::EPSILON);
        assert!((p.blur - 1.0).abs() < f32::EPSILON);
        assert!((p.antiringing - 1.0).abs() < f32::EPSILON);
    }
}
