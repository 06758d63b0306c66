//! scalefit-pipeline: resampling-kernel parameter search (sans-IO).
//!
//! Renders a source image at a reference image's resolution through a
//! chain of full-screen passes, scores the result with SSIM, and walks a
//! four-dimensional grid of kernel parameters (radius, blur, p1, p2) to
//! find the combination that reproduces the reference best.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! images and reports through callbacks. Rendering goes through the
//! [`RenderBackend`] trait: [`CpuBackend`] here, a `wgpu` backend in
//! `scalefit-gpu`. Filesystem and terminal interaction live in the
//! `scalefit` binary.

pub mod backend;
pub mod codec;
pub mod config;
pub mod cpu;
pub mod diagnostics;
pub mod kernel;
pub mod metric;
pub mod pipeline;
pub mod sweep;
pub mod types;

pub use backend::{
    ANTIRINGING_DISABLED, BackendError, PASS_PARAMS_SIZE, PassDescriptor, PassKind, PassParams,
    RenderBackend,
};
pub use codec::{decode_gray, encode_png};
pub use config::SweepConfig;
pub use cpu::CpuBackend;
pub use diagnostics::{Clock, NullClock, SweepDiagnostics};
pub use kernel::{Kernel, KernelBase, KernelShape};
pub use metric::{SimilarityMetric, Ssim};
pub use pipeline::{PlannedPass, ResamplingPipeline};
pub use sweep::{
    BestResult, GridPoint, ParameterGrid, SWEEP_EPSILON, SweepDriver, SweepOutcome, SweepRange,
    SweepRecord,
};
pub use types::{Dimensions, FilterMode, FloatImage, GrayImage, KernelParameters, PipelineError};
