//! Pass orchestration from the uploaded source to the rescaled candidate.
//!
//! One render is a strict chain of full-screen passes:
//!
//! 1. **Linearize** at source resolution (downscaling only).
//! 2. **Resample**, either two 1-D passes (vertical to `(src_w, dst_h)`,
//!    then horizontal to `(dst_w, dst_h)`) or one 2-D cylindrical pass.
//! 3. **Delinearize** at destination resolution (downscaling only).
//!
//! Each pass's output is the next pass's input and the last output is
//! kept as the current result until the next render replaces it.

use tracing::debug;

use crate::backend::{PassDescriptor, PassKind, PassParams, RenderBackend};
use crate::metric::SimilarityMetric;
use crate::types::{Dimensions, FilterMode, FloatImage, GrayImage, KernelParameters, PipelineError};

/// One step of a render, as data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedPass {
    /// Shader variant.
    pub kind: PassKind,
    /// Target dimensions the pass writes.
    pub output: Dimensions,
    /// Packed parameters handed to the backend.
    pub params: PassParams,
}

/// Renders a fixed source image at a fixed target resolution with
/// varying kernel parameters.
pub struct ResamplingPipeline<B: RenderBackend> {
    backend: B,
    source: B::Image,
    source_dims: Dimensions,
    target: Dimensions,
    filter: FilterMode,
    current: Option<B::Image>,
}

impl<B: RenderBackend> ResamplingPipeline<B> {
    /// Upload `source` and prepare to render it at `target` resolution.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if either image is empty,
    /// or [`PipelineError::Backend`] if the upload fails.
    pub fn new(
        mut backend: B,
        source: &GrayImage,
        target: Dimensions,
        filter: FilterMode,
    ) -> Result<Self, PipelineError> {
        let source_dims = Dimensions::of(source);
        if source_dims.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "source image is empty ({source_dims})"
            )));
        }
        if target.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "target resolution is empty ({target})"
            )));
        }
        let uploaded = backend.upload(source)?;
        debug!(
            backend = backend.name(),
            source = %source_dims,
            target = %target,
            %filter,
            "pipeline ready"
        );
        Ok(Self {
            backend,
            source: uploaded,
            source_dims,
            target,
            filter,
            current: None,
        })
    }

    /// `dst_width / src_width`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn scale(&self) -> f32 {
        self.target.width as f32 / self.source_dims.width as f32
    }

    /// Whether renders go through linear light.
    #[must_use]
    pub fn is_downscaling(&self) -> bool {
        self.scale() < 1.0
    }

    /// Source image dimensions.
    #[must_use]
    pub const fn source_dimensions(&self) -> Dimensions {
        self.source_dims
    }

    /// Target (reference) dimensions.
    #[must_use]
    pub const fn target_dimensions(&self) -> Dimensions {
        self.target
    }

    /// Filter mode fixed at construction.
    #[must_use]
    pub const fn filter(&self) -> FilterMode {
        self.filter
    }

    /// The passes [`resample`](Self::resample) will run for `params`.
    #[must_use]
    pub fn plan(&self, params: &KernelParameters) -> Vec<PlannedPass> {
        let scale = self.scale();
        let downscaling = scale < 1.0;
        let packed = PassParams::new(params, self.source_dims, scale);
        let mut passes = Vec::with_capacity(self.filter.resample_pass_count() + 2);

        if downscaling {
            passes.push(PlannedPass {
                kind: PassKind::Linearize,
                output: self.source_dims,
                params: packed,
            });
        }

        match self.filter {
            FilterMode::Orthogonal => {
                passes.push(PlannedPass {
                    kind: PassKind::ResampleOrthogonal,
                    output: Dimensions::new(self.source_dims.width, self.target.height),
                    params: packed.with_axis(PassParams::AXIS_VERTICAL),
                });
                passes.push(PlannedPass {
                    kind: PassKind::ResampleOrthogonal,
                    output: self.target,
                    params: packed.with_axis(PassParams::AXIS_HORIZONTAL),
                });
            }
            FilterMode::Cylindrical => {
                passes.push(PlannedPass {
                    kind: PassKind::ResampleCylindrical,
                    output: self.target,
                    params: packed,
                });
            }
        }

        if downscaling {
            passes.push(PlannedPass {
                kind: PassKind::Delinearize,
                output: self.target,
                params: packed,
            });
        }
        passes
    }

    /// Render the source at the target resolution with `params`,
    /// replacing the current result.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Backend`] if any pass fails. The current
    /// result is cleared in that case.
    pub fn resample(&mut self, params: &KernelParameters) -> Result<(), PipelineError> {
        self.current = None;
        let mut current: Option<B::Image> = None;
        for step in self.plan(params) {
            let input = current.as_ref().unwrap_or(&self.source);
            debug!(kind = %step.kind, output = %step.output, "pass");
            let output = self.backend.run_pass(&PassDescriptor {
                input,
                output: step.output,
                kind: step.kind,
                params: step.params,
            })?;
            current = Some(output);
        }
        self.current = current;
        Ok(())
    }

    /// Copy the current result back to host memory.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NothingRendered`] before the first
    /// successful [`resample`](Self::resample), or
    /// [`PipelineError::Backend`] if the read-back fails.
    pub fn read_current(&mut self) -> Result<FloatImage, PipelineError> {
        let current = self.current.as_ref().ok_or(PipelineError::NothingRendered)?;
        Ok(self.backend.read_back(current)?)
    }

    /// Render and read back in one step.
    ///
    /// # Errors
    ///
    /// See [`resample`](Self::resample) and
    /// [`read_current`](Self::read_current).
    pub fn render(&mut self, params: &KernelParameters) -> Result<FloatImage, PipelineError> {
        self.resample(params)?;
        self.read_current()
    }

    /// Score the current result against `reference`.
    ///
    /// The reference is read as `sample / 255`, the rendered result as
    /// stored. Higher is better.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NothingRendered`] before the first render,
    /// [`PipelineError::DimensionMismatch`] if the result and reference
    /// differ in size, or [`PipelineError::Backend`] on read-back failure.
    pub fn compare<M>(&mut self, reference: &GrayImage, metric: &M) -> Result<f64, PipelineError>
    where
        M: SimilarityMetric + ?Sized,
    {
        let rendered = self.read_current()?;
        let expected = Dimensions::of(reference);
        if rendered.dimensions() != expected {
            return Err(PipelineError::DimensionMismatch {
                expected,
                actual: rendered.dimensions(),
            });
        }
        let reference_at = |x: u32, y: u32| f64::from(reference.get_pixel(x, y).0[0]) / 255.0;
        let rendered_at = |x: u32, y: u32| f64::from(rendered.get(x, y));
        Ok(metric.score(expected.width, expected.height, &reference_at, &rendered_at))
    }

    /// The backend driving this pipeline.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Consume the pipeline and hand back its backend.
    #[must_use]
    pub fn into_backend(self) -> B {
        self.backend
    }
}
