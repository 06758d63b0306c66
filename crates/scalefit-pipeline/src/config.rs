//! Sweep configuration.

use serde::{Deserialize, Serialize};

use crate::kernel::Kernel;
use crate::sweep::{GridPoint, ParameterGrid, SweepRange};
use crate::types::{FilterMode, KernelParameters, PipelineError};

/// Everything that selects what a sweep renders and which parameters it
/// walks.
///
/// Deserializing a partial JSON object fills the missing fields from
/// [`Default`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Separable or radially symmetric resampling.
    pub filter: FilterMode,
    /// Kernel evaluated by every resampling pass.
    pub kernel: Kernel,
    /// Kernel radius sweep.
    pub radius: SweepRange,
    /// Blur sweep.
    pub blur: SweepRange,
    /// First free parameter sweep.
    pub p1: SweepRange,
    /// Second free parameter sweep.
    pub p2: SweepRange,
    /// Antiringing strength, honoured only when upscaling.
    pub antiringing: f32,
}

impl SweepConfig {
    /// Default filter selector (orthogonal).
    pub const DEFAULT_FILTER: i64 = 0;
    /// Default kernel selector (Lanczos).
    pub const DEFAULT_KERNEL: i64 = 0;
    /// Default radius sweep lower bound.
    pub const DEFAULT_RADIUS_LO: f32 = 2.0;
    /// Default radius sweep upper bound.
    pub const DEFAULT_RADIUS_HI: f32 = 2.0;
    /// Default radius sweep increment.
    pub const DEFAULT_RADIUS_INC: f32 = 0.0;
    /// Default blur sweep lower bound.
    pub const DEFAULT_BLUR_LO: f32 = 1.0;
    /// Default blur sweep upper bound.
    pub const DEFAULT_BLUR_HI: f32 = 1.0;
    /// Default blur sweep increment.
    pub const DEFAULT_BLUR_INC: f32 = 0.0;
    /// Default p1 sweep lower bound.
    pub const DEFAULT_P1_LO: f32 = 0.0;
    /// Default p1 sweep upper bound.
    pub const DEFAULT_P1_HI: f32 = 0.0;
    /// Default p1 sweep increment.
    pub const DEFAULT_P1_INC: f32 = 0.0;
    /// Default p2 sweep lower bound.
    pub const DEFAULT_P2_LO: f32 = 0.0;
    /// Default p2 sweep upper bound.
    pub const DEFAULT_P2_HI: f32 = 0.0;
    /// Default p2 sweep increment.
    pub const DEFAULT_P2_INC: f32 = 0.0;
    /// Default antiringing strength.
    pub const DEFAULT_ANTIRINGING: f32 = 1.0;

    /// Smallest radius or blur a sweep may start at.
    pub const MIN_POSITIVE: f32 = 1e-6;

    /// Apply the clamping rules:
    ///
    /// - radius and blur start at no less than [`MIN_POSITIVE`](Self::MIN_POSITIVE);
    /// - every `hi` is raised to at least its `lo`;
    /// - every increment is at least zero;
    /// - antiringing is clamped to `[0, 1]`.
    ///
    /// `p1` and `p2` lower bounds are left alone; negative values are
    /// meaningful for some kernels.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        Self {
            filter: self.filter,
            kernel: self.kernel,
            radius: clamp_range(self.radius, Some(Self::MIN_POSITIVE)),
            blur: clamp_range(self.blur, Some(Self::MIN_POSITIVE)),
            p1: clamp_range(self.p1, None),
            p2: clamp_range(self.p2, None),
            antiringing: self.antiringing.clamp(0.0, 1.0),
        }
    }

    /// Reject values no clamping can repair.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if any bound, increment,
    /// or the antiringing strength is NaN or infinite.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let axes = [
            ("radius", self.radius),
            ("blur", self.blur),
            ("p1", self.p1),
            ("p2", self.p2),
        ];
        for (name, range) in axes {
            let SweepRange { lo, hi, increment } = range;
            if !(lo.is_finite() && hi.is_finite() && increment.is_finite()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} sweep must be finite, got lo={lo} hi={hi} increment={increment}"
                )));
            }
        }
        if !self.antiringing.is_finite() {
            return Err(PipelineError::InvalidConfig(format!(
                "antiringing must be finite, got {}",
                self.antiringing
            )));
        }
        Ok(())
    }

    /// The parameter grid the sweep walks.
    #[must_use]
    pub const fn grid(&self) -> ParameterGrid {
        ParameterGrid {
            radius: self.radius,
            blur: self.blur,
            p1: self.p1,
            p2: self.p2,
        }
    }

    /// Kernel parameters for one grid point.
    #[must_use]
    pub const fn kernel_parameters(&self, point: GridPoint) -> KernelParameters {
        KernelParameters {
            kernel: self.kernel,
            radius: point.radius,
            blur: point.blur,
            p1: point.p1,
            p2: point.p2,
            antiringing: self.antiringing,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            filter: FilterMode::from_index_clamped(Self::DEFAULT_FILTER),
            kernel: Kernel::from_index_clamped(Self::DEFAULT_KERNEL),
            radius: SweepRange::new(
                Self::DEFAULT_RADIUS_LO,
                Self::DEFAULT_RADIUS_HI,
                Self::DEFAULT_RADIUS_INC,
            ),
            blur: SweepRange::new(
                Self::DEFAULT_BLUR_LO,
                Self::DEFAULT_BLUR_HI,
                Self::DEFAULT_BLUR_INC,
            ),
            p1: SweepRange::new(Self::DEFAULT_P1_LO, Self::DEFAULT_P1_HI, Self::DEFAULT_P1_INC),
            p2: SweepRange::new(Self::DEFAULT_P2_LO, Self::DEFAULT_P2_HI, Self::DEFAULT_P2_INC),
            antiringing: Self::DEFAULT_ANTIRINGING,
        }
    }
}

fn clamp_range(range: SweepRange, floor: Option<f32>) -> SweepRange {
    let lo = floor.map_or(range.lo, |min| range.lo.max(min));
    SweepRange {
        lo,
        hi: range.hi.max(lo),
        increment: range.increment.max(0.0),
    }
}
