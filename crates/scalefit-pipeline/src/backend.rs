//! Render backend capability trait and the packed per-pass parameters.
//!
//! The pipeline is backend-agnostic: it needs a backend to upload a
//! grayscale image, run one full-screen pass into a new offscreen target,
//! and copy a target back into host memory. Everything else (shader
//! compilation, texture formats, synchronization) stays behind the trait.

use std::fmt;

use crate::kernel::{Kernel, KernelBase, KernelShape};
use crate::types::{Dimensions, FloatImage, GrayImage, KernelParameters};

/// Antiringing value meaning "disabled". Written whenever the pass is
/// not an upscale.
pub const ANTIRINGING_DISABLED: f32 = -1.0;

/// Size in bytes of the packed parameter block.
pub const PASS_PARAMS_SIZE: usize = 64;

/// Shader variant a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Display-encoded (sRGB) to linear light, 1:1.
    Linearize,
    /// Linear light back to display encoding, 1:1.
    Delinearize,
    /// 1-D resampling along [`PassParams::axis`].
    ResampleOrthogonal,
    /// 2-D radially symmetric resampling.
    ResampleCylindrical,
}

impl PassKind {
    /// Kernel base function the pass evaluates, if it resamples.
    #[must_use]
    pub const fn kernel_base(self) -> Option<KernelBase> {
        match self {
            Self::ResampleOrthogonal => Some(KernelBase::Sinc),
            Self::ResampleCylindrical => Some(KernelBase::Jinc),
            Self::Linearize | Self::Delinearize => None,
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Linearize => "linearize",
            Self::Delinearize => "delinearize",
            Self::ResampleOrthogonal => "resample-orthogonal",
            Self::ResampleCylindrical => "resample-cylindrical",
        };
        f.write_str(name)
    }
}

/// Numeric parameters shared by every pass of one render.
///
/// Orthogonal passes differ only in [`axis`](Self::axis).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassParams {
    /// Kernel selector.
    pub kernel: Kernel,
    /// Kernel support radius.
    pub radius: f32,
    /// Blur factor.
    pub blur: f32,
    /// First free parameter.
    pub p1: f32,
    /// Second free parameter.
    pub p2: f32,
    /// Antiringing strength, or [`ANTIRINGING_DISABLED`].
    pub antiringing: f32,
    /// Effective scale, `min(scale, 1)`.
    pub scale: f32,
    /// Taps on each side of the sample center, `ceil(radius / scale)`.
    pub bound: f32,
    /// Source image dimensions.
    pub source: Dimensions,
    /// Reciprocal of the source dimensions.
    pub texel_size: [f32; 2],
    /// Filtering direction for orthogonal passes: `(0, 1)` vertical,
    /// `(1, 0)` horizontal. `(0, 0)` otherwise.
    pub axis: [f32; 2],
}

impl PassParams {
    /// Vertical filtering direction.
    pub const AXIS_VERTICAL: [f32; 2] = [0.0, 1.0];
    /// Horizontal filtering direction.
    pub const AXIS_HORIZONTAL: [f32; 2] = [1.0, 0.0];

    /// Pack the kernel parameters for a render of `source` at `scale`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(params: &KernelParameters, source: Dimensions, scale: f32) -> Self {
        let effective = scale.min(1.0);
        let antiringing = if scale > 1.0 {
            params.antiringing
        } else {
            ANTIRINGING_DISABLED
        };
        Self {
            kernel: params.kernel,
            radius: params.radius,
            blur: params.blur,
            p1: params.p1,
            p2: params.p2,
            antiringing,
            scale: effective,
            bound: (params.radius / effective).ceil(),
            source,
            texel_size: [1.0 / source.width as f32, 1.0 / source.height as f32],
            axis: [0.0, 0.0],
        }
    }

    /// Same block with a different axis selector.
    #[must_use]
    pub const fn with_axis(mut self, axis: [f32; 2]) -> Self {
        self.axis = axis;
        self
    }

    /// Whether antiringing is active for this block.
    #[must_use]
    pub fn antiringing_enabled(&self) -> bool {
        self.antiringing >= 0.0
    }

    /// The subset of parameters the kernel weight functions read.
    #[must_use]
    pub const fn shape(&self) -> KernelShape {
        KernelShape {
            radius: self.radius,
            blur: self.blur,
            p1: self.p1,
            p2: self.p2,
        }
    }

    /// Little-endian, std140-compatible encoding:
    ///
    /// | offset | field |
    /// |---|---|
    /// | 0 | kernel (`i32`) |
    /// | 4..32 | radius, blur, p1, p2, antiringing, scale, bound (`f32`) |
    /// | 32 | source dimensions (`vec2<f32>`) |
    /// | 40 | texel size (`vec2<f32>`) |
    /// | 48 | axis (`vec2<f32>`) |
    /// | 56 | padding |
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_bytes(&self) -> [u8; PASS_PARAMS_SIZE] {
        let mut out = [0u8; PASS_PARAMS_SIZE];
        let floats = [
            self.radius,
            self.blur,
            self.p1,
            self.p2,
            self.antiringing,
            self.scale,
            self.bound,
            self.source.width as f32,
            self.source.height as f32,
            self.texel_size[0],
            self.texel_size[1],
            self.axis[0],
            self.axis[1],
        ];
        out[..4].copy_from_slice(&self.kernel.index().to_le_bytes());
        for (chunk, value) in out[4..].chunks_exact_mut(4).zip(floats) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

/// One full-screen pass: read `input`, write a new target of `output`
/// dimensions.
#[derive(Debug)]
pub struct PassDescriptor<'a, I> {
    /// Image the pass samples from.
    pub input: &'a I,
    /// Dimensions of the target the pass writes.
    pub output: Dimensions,
    /// Shader variant.
    pub kind: PassKind,
    /// Packed parameters.
    pub params: PassParams,
}

/// Errors a render backend can report.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No usable device or adapter.
    #[error("render device unavailable: {0}")]
    Unavailable(String),

    /// Creating an image or target failed.
    #[error("failed to allocate image: {0}")]
    Allocation(String),

    /// A pass failed to execute.
    #[error("pass failed: {0}")]
    Pass(String),

    /// Copying a target back to host memory failed.
    #[error("read-back failed: {0}")]
    Readback(String),

    /// The image handle was not created by this backend.
    #[error("image handle does not belong to this backend")]
    UnknownImage,
}

/// Minimal set of rendering primitives the pipeline needs.
///
/// Implementations are driven strictly sequentially: every pass's output
/// becomes the next pass's input, and `read_back` blocks until the
/// target's contents are on the host.
pub trait RenderBackend {
    /// Backend-owned image handle (texture, host buffer, ...).
    type Image;

    /// Short name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Create a single-channel image resource from 8-bit samples.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Allocation`] if the resource cannot be
    /// created.
    fn upload(&mut self, image: &GrayImage) -> Result<Self::Image, BackendError>;

    /// Run one pass and return its freshly allocated output target.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Allocation`] or [`BackendError::Pass`] on
    /// failure.
    fn run_pass(&mut self, pass: &PassDescriptor<'_, Self::Image>)
    -> Result<Self::Image, BackendError>;

    /// Copy an image back into host memory as normalized floats.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Readback`] on failure.
    fn read_back(&mut self, image: &Self::Image) -> Result<FloatImage, BackendError>;
}
