//! Software render backend.
//!
//! Runs every pass on the host with the same math the GPU shaders use,
//! so sweeps and tests work without a graphics adapter. Pixel centers
//! follow the full-screen-pass convention: output pixel `(x, y)` samples
//! at normalized coordinate `((x + 0.5) / w, (y + 0.5) / h)`.

use tracing::trace;

use crate::backend::{BackendError, PassDescriptor, PassKind, PassParams, RenderBackend};
use crate::kernel::KernelBase;
use crate::types::{Dimensions, FloatImage, GrayImage};

/// Weight sums with a smaller magnitude fall back to the nearest sample.
const MIN_WEIGHT_SUM: f32 = 1e-6;

/// Host-memory render backend.
#[derive(Debug, Default)]
pub struct CpuBackend {
    passes_run: u64,
}

impl CpuBackend {
    /// Create a new software backend.
    #[must_use]
    pub const fn new() -> Self {
        Self { passes_run: 0 }
    }

    /// Number of passes executed since creation.
    #[must_use]
    pub const fn passes_run(&self) -> u64 {
        self.passes_run
    }
}

impl RenderBackend for CpuBackend {
    type Image = FloatImage;

    fn name(&self) -> &str {
        "cpu"
    }

    fn upload(&mut self, image: &GrayImage) -> Result<FloatImage, BackendError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BackendError::Allocation(format!(
                "cannot upload an empty {}x{} image",
                image.width(),
                image.height(),
            )));
        }
        Ok(FloatImage::from_gray(image))
    }

    fn run_pass(&mut self, pass: &PassDescriptor<'_, FloatImage>) -> Result<FloatImage, BackendError> {
        if pass.output.is_empty() {
            return Err(BackendError::Allocation(format!(
                "cannot allocate an empty {} target",
                pass.output,
            )));
        }
        trace!(kind = %pass.kind, output = %pass.output, "cpu pass");
        let out = match (pass.kind, pass.kind.kernel_base()) {
            (PassKind::Linearize, _) => map_samples(pass.input, pass.output, srgb_to_linear),
            (PassKind::Delinearize, _) => map_samples(pass.input, pass.output, linear_to_srgb),
            (PassKind::ResampleOrthogonal, Some(base)) => {
                resample_orthogonal(pass.input, pass.output, &pass.params, base)
            }
            (PassKind::ResampleCylindrical, Some(base)) => {
                resample_cylindrical(pass.input, pass.output, &pass.params, base)
            }
            (kind, None) => {
                return Err(BackendError::Pass(format!("{kind} pass has no kernel base")));
            }
        };
        self.passes_run += 1;
        Ok(out)
    }

    fn read_back(&mut self, image: &FloatImage) -> Result<FloatImage, BackendError> {
        Ok(image.clone())
    }
}

/// sRGB transfer function, display-encoded to linear.
#[must_use]
pub fn srgb_to_linear(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Inverse sRGB transfer function, linear to display-encoded.
#[must_use]
pub fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055f32.mul_add(c.powf(1.0 / 2.4), -0.055)
    }
}

fn map_samples(input: &FloatImage, output: Dimensions, f: fn(f32) -> f32) -> FloatImage {
    FloatImage::from_fn(output, |x, y| {
        let (sx, sy) = nearest_source(x, y, output, input.dimensions());
        f(input.get_clamped(sx, sy))
    })
}

/// Source pixel containing the center of output pixel `(x, y)`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn nearest_source(x: u32, y: u32, output: Dimensions, input: Dimensions) -> (i64, i64) {
    let u = (x as f32 + 0.5) / output.width as f32;
    let v = (y as f32 + 0.5) / output.height as f32;
    (
        (u * input.width as f32).floor() as i64,
        (v * input.height as f32).floor() as i64,
    )
}

/// `sum / weight_sum`, or `None` when the weights cancel out or the
/// result is not finite.
fn normalized(sum: f32, weight_sum: f32) -> Option<f32> {
    if weight_sum.is_nan() || weight_sum.abs() < MIN_WEIGHT_SUM {
        return None;
    }
    Some(sum / weight_sum).filter(|v| v.is_finite())
}

#[allow(clippy::cast_possible_truncation)]
fn tap_bound(params: &PassParams) -> i64 {
    if params.bound.is_finite() && params.bound >= 1.0 {
        params.bound as i64
    } else {
        1
    }
}

/// Blend toward the local min/max of the nearest samples.
///
/// Bounds that are NaN or inverted leave the value untouched.
fn antiring(value: f32, lo: f32, hi: f32, params: &PassParams) -> f32 {
    if !params.antiringing_enabled() || lo.is_nan() || hi.is_nan() || lo > hi {
        return value;
    }
    let clamped = value.max(lo).min(hi);
    (clamped - value).mul_add(params.antiringing, value)
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::similar_names
)]
fn resample_orthogonal(
    input: &FloatImage,
    output: Dimensions,
    params: &PassParams,
    base: KernelBase,
) -> FloatImage {
    let vertical = params.axis[1] > params.axis[0];
    let (axis_len, axis_out, other_in, other_out) = if vertical {
        (params.source.height, output.height, input.width(), output.width)
    } else {
        (params.source.width, output.width, input.height(), output.height)
    };
    let bound = tap_bound(params);
    let shape = params.shape();

    FloatImage::from_fn(output, |x, y| {
        let (along, across) = if vertical { (y, x) } else { (x, y) };
        let uv_along = (along as f32 + 0.5) / axis_out as f32;
        let uv_across = (across as f32 + 0.5) / other_out as f32;
        let other = (uv_across * other_in as f32).floor() as i64;
        let pos = uv_along.mul_add(axis_len as f32, -0.5);
        let origin = pos.floor();
        let frac = pos - origin;
        let origin = origin as i64;

        let fetch = |offset: i64| {
            if vertical {
                input.get_clamped(other, origin + offset)
            } else {
                input.get_clamped(origin + offset, other)
            }
        };

        let mut sum = 0.0f32;
        let mut weight_sum = 0.0f32;
        for i in (1 - bound)..=bound {
            let d = (i as f32 - frac).abs();
            let w = params.kernel.weight(d * params.scale, &shape, base);
            sum = fetch(i).mul_add(w, sum);
            weight_sum += w;
        }
        let value = normalized(sum, weight_sum).unwrap_or_else(|| fetch(i64::from(frac >= 0.5)));

        let (a, b) = (fetch(0), fetch(1));
        antiring(value, a.min(b), a.max(b), params)
    })
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::similar_names
)]
fn resample_cylindrical(
    input: &FloatImage,
    output: Dimensions,
    params: &PassParams,
    base: KernelBase,
) -> FloatImage {
    let bound = tap_bound(params);
    let shape = params.shape();
    let src_w = params.source.width as f32;
    let src_h = params.source.height as f32;

    FloatImage::from_fn(output, |x, y| {
        let u = (x as f32 + 0.5) / output.width as f32;
        let v = (y as f32 + 0.5) / output.height as f32;
        let px = u.mul_add(src_w, -0.5);
        let py = v.mul_add(src_h, -0.5);
        let (bx, by) = (px.floor(), py.floor());
        let (fx, fy) = (px - bx, py - by);
        let (bx, by) = (bx as i64, by as i64);

        let mut sum = 0.0f32;
        let mut weight_sum = 0.0f32;
        for j in (1 - bound)..=bound {
            let dy = j as f32 - fy;
            for i in (1 - bound)..=bound {
                let dx = i as f32 - fx;
                let d = dx.hypot(dy);
                let w = params.kernel.weight(d * params.scale, &shape, base);
                sum = input.get_clamped(bx + i, by + j).mul_add(w, sum);
                weight_sum += w;
            }
        }
        let value = normalized(sum, weight_sum).unwrap_or_else(|| {
            input.get_clamped(bx + i64::from(fx >= 0.5), by + i64::from(fy >= 0.5))
        });

        let corners = [
            input.get_clamped(bx, by),
            input.get_clamped(bx + 1, by),
            input.get_clamped(bx, by + 1),
            input.get_clamped(bx + 1, by + 1),
        ];
        let lo = corners.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = corners.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        antiring(value, lo, hi, params)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use crate::types::KernelParameters;

    fn uniform(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, image::Luma([value]))
    }

    fn run(
        backend: &mut CpuBackend,
        input: &FloatImage,
        output: Dimensions,
        kind: PassKind,
        params: PassParams,
    ) -> FloatImage {
        backend
            .run_pass(&PassDescriptor {
                input,
                output,
                kind,
                params,
            })
            .unwrap()
    }

    #[test]
    fn srgb_round_trip_is_stable() {
        for i in 0..=20 {
            let c = i as f32 / 20.0;
            assert!((linear_to_srgb(srgb_to_linear(c)) - c).abs() < 1e-5, "{c}");
        }
    }

    #[test]
    fn srgb_endpoints() {
        assert!(srgb_to_linear(0.0).abs() < f32::EPSILON);
        assert!((srgb_to_linear(1.0) - 1.0).abs() < 1e-6);
        assert!((linear_to_srgb(1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn linearize_darkens_midtones() {
        let mut backend = CpuBackend::new();
        let src = backend.upload(&uniform(2, 2, 128)).unwrap();
        let dims = src.dimensions();
        let params = PassParams::new(&KernelParameters::default(), dims, 0.5);
        let out = run(&mut backend, &src, dims, PassKind::Linearize, params);
        assert!(out.get(0, 0) < src.get(0, 0));
    }

    #[test]
    fn upload_rejects_empty_image() {
        let mut backend = CpuBackend::new();
        let result = backend.upload(&GrayImage::new(0, 3));
        assert!(matches!(result, Err(BackendError::Allocation(_))));
    }

    #[test]
    fn orthogonal_pass_preserves_uniform_image() {
        let mut backend = CpuBackend::new();
        let src = backend.upload(&uniform(4, 4, 128)).unwrap();
        let params = PassParams::new(&KernelParameters::default(), Dimensions::new(4, 4), 2.0)
            .with_axis(PassParams::AXIS_VERTICAL);
        let out = run(
            &mut backend,
            &src,
            Dimensions::new(4, 8),
            PassKind::ResampleOrthogonal,
            params,
        );
        assert_eq!(out.dimensions(), Dimensions::new(4, 8));
        for &v in out.as_raw() {
            assert!((v - 128.0 / 255.0).abs() < 1e-5, "{v}");
        }
    }

    #[test]
    fn cylindrical_pass_preserves_uniform_image() {
        let mut backend = CpuBackend::new();
        let src = backend.upload(&uniform(4, 4, 200)).unwrap();
        let params = PassParams::new(&KernelParameters::default(), Dimensions::new(4, 4), 1.5);
        let out = run(
            &mut backend,
            &src,
            Dimensions::new(6, 6),
            PassKind::ResampleCylindrical,
            params,
        );
        assert_eq!(out.dimensions(), Dimensions::new(6, 6));
        for &v in out.as_raw() {
            assert!((v - 200.0 / 255.0).abs() < 1e-5, "{v}");
        }
    }

    #[test]
    fn identity_scale_reproduces_source() {
        // At scale 1 every output center lands on a source center, where
        // Lanczos is 1 at the tap and 0 at every other integer offset.
        let gray = GrayImage::from_fn(5, 1, |x, _| image::Luma([(x * 50) as u8]));
        let mut backend = CpuBackend::new();
        let src = backend.upload(&gray).unwrap();
        let params = PassParams::new(&KernelParameters::default(), Dimensions::new(5, 1), 1.0)
            .with_axis(PassParams::AXIS_HORIZONTAL);
        let out = run(
            &mut backend,
            &src,
            Dimensions::new(5, 1),
            PassKind::ResampleOrthogonal,
            params,
        );
        for x in 0..5 {
            assert!((out.get(x, 0) - src.get(x, 0)).abs() < 1e-5);
        }
    }

    #[test]
    fn antiringing_clamps_overshoot_on_upscale() {
        // A hard step upscaled with Lanczos overshoots; full antiringing
        // keeps every output inside the input range.
        let gray = GrayImage::from_fn(8, 1, |x, _| image::Luma([if x < 4 { 0 } else { 255 }]));
        let mut backend = CpuBackend::new();
        let src = backend.upload(&gray).unwrap();
        let kernel = KernelParameters {
            kernel: Kernel::Lanczos,
            radius: 3.0,
            antiringing: 1.0,
            ..KernelParameters::default()
        };
        let params = PassParams::new(&kernel, Dimensions::new(8, 1), 4.0)
            .with_axis(PassParams::AXIS_HORIZONTAL);
        let out = run(
            &mut backend,
            &src,
            Dimensions::new(32, 1),
            PassKind::ResampleOrthogonal,
            params,
        );
        for &v in out.as_raw() {
            assert!((-1e-6..=1.0 + 1e-6).contains(&v), "{v}");
        }

        let ringing = KernelParameters {
            antiringing: 0.0,
            ..kernel
        };
        let params = PassParams::new(&ringing, Dimensions::new(8, 1), 4.0)
            .with_axis(PassParams::AXIS_HORIZONTAL);
        let out = run(
            &mut backend,
            &src,
            Dimensions::new(32, 1),
            PassKind::ResampleOrthogonal,
            params,
        );
        assert!(out.as_raw().iter().any(|&v| !(0.0..=1.0).contains(&v)));
    }

    #[test]
    fn empty_target_is_an_allocation_error() {
        let mut backend = CpuBackend::new();
        let src = backend.upload(&uniform(2, 2, 0)).unwrap();
        let params = PassParams::new(&KernelParameters::default(), Dimensions::new(2, 2), 1.0);
        let result = backend.run_pass(&PassDescriptor {
            input: &src,
            output: Dimensions::new(0, 2),
            kind: PassKind::ResampleCylindrical,
            params,
        });
        assert!(matches!(result, Err(BackendError::Allocation(_))));
    }

    #[test]
    fn antiring_ignores_nan_or_inverted_bounds() {
        let params = PassParams::new(&KernelParameters::default(), Dimensions::new(2, 2), 2.0);
        assert!(params.antiringing_enabled());
        assert!((antiring(0.3, f32::NAN, f32::NAN, &params) - 0.3).abs() < f32::EPSILON);
        assert!((antiring(0.3, f32::INFINITY, f32::NEG_INFINITY, &params) - 0.3).abs() < f32::EPSILON);
        assert!((antiring(1.5, 0.0, 1.0, &params) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn degenerate_weight_sums_fall_back() {
        assert_eq!(normalized(1.0, f32::NAN), None);
        assert_eq!(normalized(1.0, 0.0), None);
        assert_eq!(normalized(f32::INFINITY, 1.0), None);
        assert_eq!(normalized(1.0, 2.0), Some(0.5));
    }

    #[test]
    fn said_with_tiny_blur_stays_finite() {
        let gray = GrayImage::from_fn(6, 6, |x, y| image::Luma([((x * 40 + y * 7) % 256) as u8]));
        for filter in [PassKind::ResampleOrthogonal, PassKind::ResampleCylindrical] {
            for blur in [0.001, 0.501, 1.001] {
                let mut backend = CpuBackend::new();
                let src = backend.upload(&gray).unwrap();
                let kernel = KernelParameters {
                    kernel: Kernel::Said,
                    blur,
                    p1: 1.0,
                    p2: 1.0,
                    ..KernelParameters::default()
                };
                let params = PassParams::new(&kernel, Dimensions::new(6, 6), 2.0)
                    .with_axis(PassParams::AXIS_HORIZONTAL);
                let out = run(&mut backend, &src, Dimensions::new(12, 6), filter, params);
                assert!(
                    out.as_raw().iter().all(|v| v.is_finite()),
                    "{filter} blur {blur}"
                );
            }
        }
    }

    #[test]
    fn passes_are_counted() {
        let mut backend = CpuBackend::new();
        let src = backend.upload(&uniform(2, 2, 10)).unwrap();
        let params = PassParams::new(&KernelParameters::default(), Dimensions::new(2, 2), 1.0);
        let a = run(&mut backend, &src, Dimensions::new(2, 2), PassKind::Linearize, params);
        let _ = run(&mut backend, &a, Dimensions::new(2, 2), PassKind::Delinearize, params);
        assert_eq!(backend.passes_run(), 2);
    }
}
