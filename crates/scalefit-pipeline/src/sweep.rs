//! Parameter grid enumeration and best-result search.
//!
//! Each axis is a [`SweepRange`] that expands into a finite sequence;
//! [`ParameterGrid`] nests four of them (radius, blur, p1, p2, outer to
//! inner). [`SweepDriver`] renders and scores every grid point, reports
//! each result, and keeps the strictly best one.

use std::fmt;
use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::RenderBackend;
use crate::config::SweepConfig;
use crate::diagnostics::{Clock, SweepDiagnostics};
use crate::kernel::Kernel;
use crate::metric::SimilarityMetric;
use crate::pipeline::ResamplingPipeline;
use crate::types::{GrayImage, KernelParameters, PipelineError};

/// Tolerance added to the upper bound so that `hi` itself is produced
/// despite floating-point error in `lo + k * increment`.
pub const SWEEP_EPSILON: f64 = 1e-6;

/// One sweep axis: `lo, lo + increment, ...` up to `hi`.
///
/// An increment that is not strictly positive produces exactly `lo`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRange {
    /// First value.
    pub lo: f32,
    /// Last value (inclusive, within [`SWEEP_EPSILON`]).
    pub hi: f32,
    /// Step size; `0` means a single value.
    pub increment: f32,
}

impl SweepRange {
    /// Create a range.
    #[must_use]
    pub const fn new(lo: f32, hi: f32, increment: f32) -> Self {
        Self { lo, hi, increment }
    }

    /// A range holding only `value`.
    #[must_use]
    pub const fn fixed(value: f32) -> Self {
        Self::new(value, value, 0.0)
    }

    /// The values of this axis, in increasing order.
    #[must_use]
    pub const fn values(&self) -> SweepValues {
        SweepValues {
            range: *self,
            index: 0,
            done: false,
        }
    }

    /// Number of values [`values`](Self::values) yields.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.values().count() as u64
    }

    /// Whether the range yields nothing (`lo` above `hi` with a
    /// positive increment).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values().next().is_none()
    }
}

/// Iterator over the values of a [`SweepRange`].
///
/// Values are computed as `lo + k * increment` in `f64`, so long sweeps
/// do not accumulate rounding error.
#[derive(Debug, Clone)]
pub struct SweepValues {
    range: SweepRange,
    index: u64,
    done: bool,
}

impl Iterator for SweepValues {
    type Item = f32;

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn next(&mut self) -> Option<f32> {
        if self.done {
            return None;
        }
        let SweepRange { lo, hi, increment } = self.range;
        if !(increment > 0.0) {
            self.done = true;
            return Some(lo);
        }
        let value = (self.index as f64).mul_add(f64::from(increment), f64::from(lo));
        if value < f64::from(hi) + SWEEP_EPSILON {
            self.index += 1;
            Some(value as f32)
        } else {
            self.done = true;
            None
        }
    }
}

impl FusedIterator for SweepValues {}

/// One combination of the four swept parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Kernel radius.
    pub radius: f32,
    /// Blur factor.
    pub blur: f32,
    /// First free parameter.
    pub p1: f32,
    /// Second free parameter.
    pub p2: f32,
}

/// The cartesian product of four sweep axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    /// Outermost axis.
    pub radius: SweepRange,
    /// Second axis.
    pub blur: SweepRange,
    /// Third axis.
    pub p1: SweepRange,
    /// Innermost axis.
    pub p2: SweepRange,
}

impl ParameterGrid {
    /// Every grid point, radius outermost and p2 innermost.
    pub fn points(&self) -> impl Iterator<Item = GridPoint> + Clone + use<> {
        let Self { radius, blur, p1, p2 } = *self;
        radius.values().flat_map(move |radius| {
            blur.values().flat_map(move |blur| {
                p1.values().flat_map(move |p1| {
                    p2.values().map(move |p2| GridPoint {
                        radius,
                        blur,
                        p1,
                        p2,
                    })
                })
            })
        })
    }

    /// Number of grid points.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.radius.len() * self.blur.len() * self.p1.len() * self.p2.len()
    }

    /// Whether the grid has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The result of scoring one grid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    /// Kernel radius.
    pub radius: f32,
    /// Blur factor.
    pub blur: f32,
    /// First free parameter.
    pub p1: f32,
    /// Second free parameter.
    pub p2: f32,
    /// Similarity score; higher is better.
    pub score: f64,
}

impl SweepRecord {
    /// Attach a score to a grid point.
    #[must_use]
    pub const fn new(point: GridPoint, score: f64) -> Self {
        Self {
            radius: point.radius,
            blur: point.blur,
            p1: point.p1,
            p2: point.p2,
            score,
        }
    }

    /// The grid point this record scored.
    #[must_use]
    pub const fn point(&self) -> GridPoint {
        GridPoint {
            radius: self.radius,
            blur: self.blur,
            p1: self.p1,
            p2: self.p2,
        }
    }
}

impl fmt::Display for SweepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "R: {:.6}, B: {:.6}, P1: {:.6}, P2: {:.6}, SSIM: {:.15}",
            self.radius, self.blur, self.p1, self.p2, self.score,
        )
    }
}

/// Running maximum over sweep records.
///
/// The first record offered always becomes best; later ones replace it
/// only with a strictly greater score, so ties keep the earlier point.
/// A NaN score never beats a held record, and any comparable score
/// replaces a NaN one, so a single NaN point cannot hide the rest of the
/// sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BestResult {
    best: Option<SweepRecord>,
}

impl BestResult {
    /// An empty tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self { best: None }
    }

    /// Consider `record`. Returns `true` if it became the new best.
    pub fn offer(&mut self, record: SweepRecord) -> bool {
        let better = self.best.is_none_or(|best| {
            !record.score.is_nan() && (best.score.is_nan() || record.score > best.score)
        });
        if better {
            self.best = Some(record);
        }
        better
    }

    /// The best record so far.
    #[must_use]
    pub const fn get(&self) -> Option<&SweepRecord> {
        self.best.as_ref()
    }
}

impl fmt::Display for BestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.best {
            Some(record) => write!(f, "The best: {record}"),
            None => f.write_str("The best: none"),
        }
    }
}

/// What a finished sweep produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepOutcome {
    /// The highest-scoring point (earliest on ties).
    pub best: SweepRecord,
    /// Number of points rendered and scored.
    pub evaluated: u64,
    /// Timing and counts.
    pub diagnostics: SweepDiagnostics,
}

/// Runs the exhaustive grid search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepDriver {
    grid: ParameterGrid,
    kernel: Kernel,
    antiringing: f32,
}

impl SweepDriver {
    /// Create a driver over `grid` with a fixed kernel and antiringing.
    #[must_use]
    pub const fn new(grid: ParameterGrid, kernel: Kernel, antiringing: f32) -> Self {
        Self {
            grid,
            kernel,
            antiringing,
        }
    }

    /// Create a driver from a configuration, after clamping it.
    #[must_use]
    pub fn from_config(config: &SweepConfig) -> Self {
        let config = config.sanitized();
        Self::new(config.grid(), config.kernel, config.antiringing)
    }

    /// The grid this driver walks.
    #[must_use]
    pub const fn grid(&self) -> &ParameterGrid {
        &self.grid
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

    /// Render and score every grid point, handing each record to `sink`
    /// in nesting order.
    ///
    /// # Errors
    ///
    /// Stops at the first render or comparison failure. Returns
    /// [`PipelineError::InvalidConfig`] if the grid has no points.
    pub fn run<B, M, C>(
        &self,
        pipeline: &mut ResamplingPipeline<B>,
        reference: &GrayImage,
        metric: &M,
        clock: &C,
        mut sink: impl FnMut(&SweepRecord),
    ) -> Result<SweepOutcome, PipelineError>
    where
        B: RenderBackend,
        M: SimilarityMetric + ?Sized,
        C: Clock,
    {
        let start = clock.now();
        let mut diagnostics = SweepDiagnostics {
            backend: pipeline.backend().name().to_owned(),
            ..SweepDiagnostics::default()
        };
        let mut best = BestResult::new();

        info!(
            points = self.grid.len(),
            kernel = %self.kernel,
            filter = %pipeline.filter(),
            "starting sweep"
        );

        for point in self.grid.points() {
            let params = self.kernel_parameters(point);

            let render_start = clock.now();
            pipeline.resample(&params)?;
            diagnostics.render_duration += clock.elapsed(&render_start);

            let compare_start = clock.now();
            let score = pipeline.compare(reference, metric)?;
            diagnostics.compare_duration += clock.elapsed(&compare_start);

            let record = SweepRecord::new(point, score);
            debug!(%record, "scored");
            sink(&record);
            if best.offer(record) {
                debug!(score, "new best");
            }
            diagnostics.evaluated += 1;
        }

        diagnostics.passes_per_point = pipeline.plan(&KernelParameters::default()).len();
        diagnostics.total_duration = clock.elapsed(&start);

        let best = *best
            .get()
            .ok_or_else(|| PipelineError::InvalidConfig("parameter grid is empty".to_owned()))?;
        info!(%best, evaluated = diagnostics.evaluated, "sweep finished");

        Ok(SweepOutcome {
            best,
            evaluated: diagnostics.evaluated,
            diagnostics,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn collect(range: SweepRange) -> Vec<f32> {
        range.values().collect()
    }

    fn record(radius: f32, score: f64) -> SweepRecord {
        SweepRecord {
            radius,
            blur: 1.0,
            p1: 0.0,
            p2: 0.0,
            score,
        }
    }

    #[test]
    fn zero_increment_yields_lo_once() {
        assert_eq!(collect(SweepRange::new(2.0, 5.0, 0.0)), vec![2.0]);
        // Regardless of hi.
        assert_eq!(collect(SweepRange::new(2.0, -5.0, 0.0)), vec![2.0]);
    }

    #[test]
    fn negative_or_nan_increment_yields_lo_once() {
        assert_eq!(collect(SweepRange::new(1.0, 3.0, -0.5)), vec![1.0]);
        assert_eq!(collect(SweepRange::new(1.0, 3.0, f32::NAN)), vec![1.0]);
    }

    #[test]
    fn positive_increment_includes_hi() {
        assert_eq!(collect(SweepRange::new(2.0, 4.0, 1.0)), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn fractional_steps_reach_hi_within_epsilon() {
        // 0.1 is not exactly representable; hi must still be produced.
        let values = collect(SweepRange::new(0.0, 1.0, 0.1));
        assert_eq!(values.len(), 11);
        let last = *values.last().unwrap();
        assert!((last - 1.0).abs() < 1e-6);
        assert!(f64::from(last) <= 1.0 + SWEEP_EPSILON);
    }

    #[test]
    fn count_matches_floor_formula() {
        for (lo, hi, inc) in [(0.0f32, 1.0f32, 0.3f32), (1.0, 2.5, 0.5), (-1.0, 1.0, 0.25)] {
            let expected = ((hi - lo) / inc).floor() as u64 + 1;
            assert_eq!(SweepRange::new(lo, hi, inc).len(), expected, "{lo}..{hi} by {inc}");
        }
    }

    #[test]
    fn increment_larger_than_span_yields_lo_only() {
        assert_eq!(collect(SweepRange::new(1.0, 1.5, 2.0)), vec![1.0]);
    }

    #[test]
    fn values_are_restartable() {
        let range = SweepRange::new(0.0, 2.0, 1.0);
        let first: Vec<f32> = range.values().collect();
        let second: Vec<f32> = range.values().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn lo_above_hi_with_positive_increment_is_empty() {
        let range = SweepRange::new(3.0, 1.0, 1.0);
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
    }

    #[test]
    fn grid_nests_radius_outermost() {
        let grid = ParameterGrid {
            radius: SweepRange::new(1.0, 2.0, 1.0),
            blur: SweepRange::fixed(1.0),
            p1: SweepRange::fixed(0.0),
            p2: SweepRange::new(0.0, 1.0, 1.0),
        };
        let points: Vec<(f32, f32)> = grid.points().map(|p| (p.radius, p.p2)).collect();
        assert_eq!(points, vec![(1.0, 0.0), (1.0, 1.0), (2.0, 0.0), (2.0, 1.0)]);
        assert_eq!(grid.len(), 4);
    }

    #[test]
    fn grid_len_is_product_of_axes() {
        let grid = ParameterGrid {
            radius: SweepRange::new(1.0, 3.0, 1.0),
            blur: SweepRange::new(0.8, 1.2, 0.2),
            p1: SweepRange::new(0.0, 1.0, 0.5),
            p2: SweepRange::fixed(0.0),
        };
        assert_eq!(grid.len(), 27);
        assert_eq!(grid.points().count(), 27);
    }

    #[test]
    fn first_record_always_becomes_best() {
        let mut best = BestResult::new();
        assert!(best.offer(record(1.0, -0.5)));
        assert!((best.get().unwrap().score + 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn ties_keep_the_earlier_record() {
        let mut best = BestResult::new();
        best.offer(record(1.0, 0.9));
        assert!(!best.offer(record(2.0, 0.9)));
        assert!((best.get().unwrap().radius - 1.0).abs() < f32::EPSILON);
        assert!(best.offer(record(3.0, 0.95)));
        assert!((best.get().unwrap().radius - 3.0).abs() < f32::EPSILON);
        assert!(!best.offer(record(4.0, 0.1)));
    }

    #[test]
    fn nan_score_does_not_hold_best() {
        let mut best = BestResult::new();
        best.offer(record(1.0, f64::NAN));
        assert!(best.offer(record(2.0, 0.9)));
        assert!(!best.offer(record(3.0, f64::NAN)));
        let held = best.get().unwrap();
        assert!((held.radius - 2.0).abs() < f32::EPSILON);
        assert!((held.score - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn record_display_format() {
        let r = SweepRecord {
            radius: 2.0,
            blur: 1.0,
            p1: 0.5,
            p2: -0.25,
            score: 0.987_654_321,
        };
        assert_eq!(
            r.to_string(),
            "R: 2.000000, B: 1.000000, P1: 0.500000, P2: -0.250000, SSIM: 0.987654321000000",
        );
    }

    #[test]
    fn best_display_has_prefix() {
        let mut best = BestResult::new();
        assert_eq!(best.to_string(), "The best: none");
        best.offer(record(2.0, 1.0));
        assert!(best.to_string().starts_with("The best: R: 2.000000,"));
    }
}
