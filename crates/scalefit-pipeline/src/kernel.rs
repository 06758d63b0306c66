//! Resampling kernel selection and weight functions.
//!
//! The pipeline itself treats kernels as opaque: it only forwards a
//! [`Kernel`] selector and four numbers (radius, blur, p1, p2) to the
//! render backend. The weight functions here are what the software
//! backend evaluates; the GPU backend carries a WGSL copy of the same
//! math.
//!
//! Windowed kernels are `base(x / blur) * window(x / radius)`, where the
//! base is `sinc` for orthogonal passes and `jinc` for cylindrical ones.
//! The polynomial kernels (bicubic, FSR, BC-spline) ignore the base and
//! are evaluated directly on `x / blur`. Every kernel is zero at and
//! beyond `radius`.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

/// First zero of `jinc(x) = 2 J1(pi x) / (pi x)`.
const JINC_ZERO: f64 = 1.219_669_891_266_504_5;

/// Arguments closer to zero than this evaluate to the limit value.
const EPSILON: f64 = 1e-6;

/// Resampling kernel, in command-line index order (0–11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Kernel {
    /// Base function windowed by itself (sinc window / jinc window).
    #[default]
    Lanczos,
    /// Base function windowed by the opposite family (jinc window for
    /// orthogonal, sinc window for cylindrical).
    Ginseng,
    /// Hamming window.
    Hamming,
    /// `cos(pi t / 2)^p1` window.
    PowCosine,
    /// Kaiser window with `beta = p1`.
    Kaiser,
    /// `(1 - t^p1)^p2` window.
    PowGaramond,
    /// Blackman window with `alpha = p1`, evaluated at `t^p2`.
    PowBlackman,
    /// Generalized normal window, scale `p1`, shape `p2`.
    Gnw,
    /// Said filter, `chi = p1`, `eta = p2`.
    Said,
    /// Keys cubic with `a = p1`.
    Bicubic,
    /// FSR-style polynomial Lanczos approximation, `b = p1`, `c = p2`.
    Fsr,
    /// Mitchell-Netravali BC-spline, `B = p1`, `C = p2`.
    BcSpline,
}

impl Kernel {
    /// All kernels in selector order.
    pub const ALL: [Self; 12] = [
        Self::Lanczos,
        Self::Ginseng,
        Self::Hamming,
        Self::PowCosine,
        Self::Kaiser,
        Self::PowGaramond,
        Self::PowBlackman,
        Self::Gnw,
        Self::Said,
        Self::Bicubic,
        Self::Fsr,
        Self::BcSpline,
    ];

    /// Selector index written into the packed pass parameters.
    #[must_use]
    pub const fn index(self) -> i32 {
        match self {
            Self::Lanczos => 0,
            Self::Ginseng => 1,
            Self::Hamming => 2,
            Self::PowCosine => 3,
            Self::Kaiser => 4,
            Self::PowGaramond => 5,
            Self::PowBlackman => 6,
            Self::Gnw => 7,
            Self::Said => 8,
            Self::Bicubic => 9,
            Self::Fsr => 10,
            Self::BcSpline => 11,
        }
    }

    /// Look up a kernel by selector index.
    #[must_use]
    pub fn from_index(index: i64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Look up a kernel by selector index, clamping into `0..=11`.
    #[must_use]
    pub fn from_index_clamped(index: i64) -> Self {
        let last = Self::ALL.len() as i64 - 1;
        Self::from_index(index.clamp(0, last)).unwrap_or_default()
    }

    /// Evaluate the kernel at distance `x` (already multiplied by the
    /// effective scale) from the sample center.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn weight(self, x: f32, shape: &KernelShape, base: KernelBase) -> f32 {
        let x = f64::from(x).abs();
        let radius = f64::from(shape.radius);
        if x >= radius {
            return 0.0;
        }
        let blur = f64::from(shape.blur).max(EPSILON);
        let xb = x / blur;
        let t = x / radius;
        let p1 = f64::from(shape.p1);
        let p2 = f64::from(shape.p2);

        let w = match self {
            Self::Lanczos => base.eval(xb) * base.self_window(t),
            Self::Ginseng => base.eval(xb) * base.opposite_window(t),
            Self::Hamming => base.eval(xb) * 0.46f64.mul_add((PI * t).cos(), 0.54),
            Self::PowCosine => base.eval(xb) * safe_pow((PI * t / 2.0).cos(), p1),
            Self::Kaiser => base.eval(xb) * kaiser_window(t, p1),
            Self::PowGaramond => base.eval(xb) * safe_pow(1.0 - safe_pow(t, p1), p2),
            Self::PowBlackman => base.eval(xb) * blackman_window(safe_pow(t, p2), p1),
            Self::Gnw => base.eval(xb) * (-safe_pow(x / p1.max(EPSILON), p2)).exp(),
            Self::Said => base.eval(xb) * said_window(xb, p1, p2),
            Self::Bicubic => keys_cubic(xb, p1),
            Self::Fsr => fsr(xb, p1, p2),
            Self::BcSpline => bc_spline(xb, p1, p2),
        };
        let w = w as f32;
        // Overflowing parameter combinations contribute nothing.
        if w.is_finite() { w } else { 0.0 }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lanczos => "Lanczos",
            Self::Ginseng => "Ginseng",
            Self::Hamming => "Hamming",
            Self::PowCosine => "PowCosine",
            Self::Kaiser => "Kaiser",
            Self::PowGaramond => "PowGaramond",
            Self::PowBlackman => "PowBlackman",
            Self::Gnw => "GNW",
            Self::Said => "Said",
            Self::Bicubic => "Bicubic",
            Self::Fsr => "FSR",
            Self::BcSpline => "BCSpline",
        };
        f.write_str(name)
    }
}

/// The numeric kernel parameters a weight evaluation needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelShape {
    /// Support radius.
    pub radius: f32,
    /// Blur factor.
    pub blur: f32,
    /// First free parameter.
    pub p1: f32,
    /// Second free parameter.
    pub p2: f32,
}

/// Base function family: `sinc` for separable passes, `jinc` for
/// radially symmetric ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelBase {
    /// `sin(pi x) / (pi x)`.
    Sinc,
    /// `2 J1(pi x) / (pi x)`.
    Jinc,
}

impl KernelBase {
    fn eval(self, x: f64) -> f64 {
        match self {
            Self::Sinc => sinc(x),
            Self::Jinc => jinc(x),
        }
    }

    /// Window of the same family, stretched so its first zero lands on
    /// `t = 1`.
    fn self_window(self, t: f64) -> f64 {
        match self {
            Self::Sinc => sinc(t),
            Self::Jinc => jinc(t * JINC_ZERO),
        }
    }

    fn opposite_window(self, t: f64) -> f64 {
        match self {
            Self::Sinc => jinc(t * JINC_ZERO),
            Self::Jinc => sinc(t),
        }
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < EPSILON {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

fn jinc(x: f64) -> f64 {
    if x.abs() < EPSILON {
        1.0
    } else {
        let px = PI * x;
        2.0 * bessel_j1(px) / px
    }
}

/// `pow` with `x^0 = 1` and non-positive bases mapped to zero, so no
/// parameter combination produces NaN.
fn safe_pow(base: f64, exponent: f64) -> f64 {
    if exponent == 0.0 {
        1.0
    } else if base <= 0.0 {
        0.0
    } else {
        base.powf(exponent)
    }
}

/// Bessel function of the first kind, order one (rational
/// approximation, accurate to ~1e-8).
#[allow(clippy::unreadable_literal)]
fn bessel_j1(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 8.0 {
        let y = x * x;
        let num = x * (72362614232.0
            + y * (-7895059235.0
                + y * (242396853.1
                    + y * (-2972611.439 + y * (15704.48260 + y * (-30.16036606))))));
        let den = 144725228442.0
            + y * (2300535178.0 + y * (18583304.74 + y * (99447.43394 + y * (376.9991397 + y))));
        num / den
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 2.356194491;
        let p = 1.0
            + y * (0.183105e-2
                + y * (-0.3516396496e-4 + y * (0.2457520174e-5 + y * (-0.240337019e-6))));
        let q = 0.04687499995
            + y * (-0.2002690873e-3
                + y * (0.8449199096e-5 + y * (-0.88228987e-6 + y * 0.105787412e-6)));
        let ans = (0.636619772 / ax).sqrt() * (xx.cos() * p - z * xx.sin() * q);
        if x < 0.0 { -ans } else { ans }
    }
}

/// Modified Bessel function of the first kind, order zero (power series).
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..32 {
        let k = f64::from(k);
        term *= (half / k) * (half / k);
        sum += term;
        if term < sum * 1e-12 {
            break;
        }
    }
    sum
}

fn kaiser_window(t: f64, beta: f64) -> f64 {
    let arg = (1.0 - t * t).max(0.0).sqrt();
    bessel_i0(beta * arg) / bessel_i0(beta)
}

fn blackman_window(t: f64, alpha: f64) -> f64 {
    (1.0 - alpha) / 2.0 + 0.5 * (PI * t).cos() + alpha / 2.0 * (2.0 * PI * t).cos()
}

fn said_window(x: f64, chi: f64, eta: f64) -> f64 {
    let denom = 2.0 - eta;
    if denom.abs() < EPSILON {
        return 1.0;
    }
    let k = PI * chi * x / denom;
    let a = ((2.0 * eta.max(0.0)).sqrt() * k).abs();
    // cosh(a) * exp(-k^2) with the exponents combined; the product form
    // overflows to inf * 0 for large `a`.
    0.5 * ((a - k * k).exp() + (-a - k * k).exp())
}

fn keys_cubic(x: f64, a: f64) -> f64 {
    if x < 1.0 {
        ((a + 2.0) * x - (a + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        ((a * x - 5.0 * a) * x + 8.0 * a) * x - 4.0 * a
    } else {
        0.0
    }
}

fn fsr(x: f64, b: f64, c: f64) -> f64 {
    let denom = 2.0 * b - b * b;
    if denom.abs() < EPSILON {
        return sinc(x);
    }
    let norm = 1.0 / denom;
    let base = b * x * x - 1.0;
    let window = c * x * x - 1.0;
    (norm * base * base - (norm - 1.0)) * window * window
}

fn bc_spline(x: f64, b: f64, c: f64) -> f64 {
    let w = if x < 1.0 {
        (12.0 - 9.0 * b - 6.0 * c) * x * x * x
            + (-18.0 + 12.0 * b + 6.0 * c) * x * x
            + (6.0 - 2.0 * b)
    } else if x < 2.0 {
        (-b - 6.0 * c) * x * x * x
            + (6.0 * b + 30.0 * c) * x * x
            + (-12.0 * b - 48.0 * c) * x
            + (8.0 * b + 24.0 * c)
    } else {
        0.0
    };
    w / 6.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: KernelShape = KernelShape {
        radius: 3.0,
        blur: 1.0,
        p1: 0.0,
        p2: 0.0,
    };

    #[test]
    fn index_round_trips_through_selector_order() {
        for (i, kernel) in Kernel::ALL.iter().enumerate() {
            assert_eq!(kernel.index() as usize, i);
            assert_eq!(Kernel::from_index(i as i64), Some(*kernel));
        }
    }

    #[test]
    fn from_index_out_of_range_is_none() {
        assert_eq!(Kernel::from_index(-1), None);
        assert_eq!(Kernel::from_index(12), None);
    }

    #[test]
    fn from_index_clamped_saturates() {
        assert_eq!(Kernel::from_index_clamped(-7), Kernel::Lanczos);
        assert_eq!(Kernel::from_index_clamped(99), Kernel::BcSpline);
        assert_eq!(Kernel::from_index_clamped(4), Kernel::Kaiser);
    }

    #[test]
    fn sinc_and_jinc_are_one_at_origin() {
        assert!((sinc(0.0) - 1.0).abs() < 1e-12);
        assert!((jinc(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sinc_zero_crossings_at_integers() {
        for n in 1..5 {
            assert!(sinc(f64::from(n)).abs() < 1e-12);
        }
    }

    #[test]
    fn jinc_first_zero() {
        assert!(jinc(JINC_ZERO).abs() < 1e-6);
    }

    #[test]
    fn bessel_i0_at_zero_is_one() {
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-12);
        // I0(1) = 1.2660658777...
        assert!((bessel_i0(1.0) - 1.266_065_877_752).abs() < 1e-9);
    }

    #[test]
    fn lanczos_is_one_at_center_and_zero_at_radius() {
        let k = Kernel::Lanczos;
        assert!((k.weight(0.0, &SHAPE, KernelBase::Sinc) - 1.0).abs() < 1e-6);
        assert!(k.weight(3.0, &SHAPE, KernelBase::Sinc).abs() < 1e-12);
        assert!(k.weight(4.5, &SHAPE, KernelBase::Sinc).abs() < 1e-12);
    }

    #[test]
    fn lanczos_has_zero_crossing_at_one() {
        let w = Kernel::Lanczos.weight(1.0, &SHAPE, KernelBase::Sinc);
        assert!(w.abs() < 1e-6, "got {w}");
    }

    #[test]
    fn every_kernel_is_finite_inside_support() {
        for blur in [1.0, 1e-3, 1e-6] {
            for (p1, p2) in [(0.5, 0.5), (1.0, 1.0), (50.0, 50.0), (-20.0, 1e4)] {
                let shape = KernelShape {
                    radius: 2.0,
                    blur,
                    p1,
                    p2,
                };
                for kernel in Kernel::ALL {
                    for base in [KernelBase::Sinc, KernelBase::Jinc] {
                        for step in 0..40 {
                            let x = step as f32 * 0.05;
                            let w = kernel.weight(x, &shape, base);
                            assert!(
                                w.is_finite(),
                                "{kernel} {base:?} blur {blur} p1 {p1} p2 {p2} at {x} -> {w}"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn said_window_stays_finite_for_large_arguments() {
        // cosh alone overflows f64 past ~710.
        let w = said_window(2000.0, 1.0, 1.0);
        assert!(w.is_finite());
        assert!(w.abs() < 1e-300);
        let near = said_window(0.1, 1.0, 1.0);
        let product = ((2.0f64.sqrt() * PI * 0.1).cosh()) * (-(PI * 0.1).powi(2)).exp();
        assert!((near - product).abs() < 1e-12);
    }

    #[test]
    fn every_kernel_vanishes_outside_support() {
        for kernel in Kernel::ALL {
            let w = kernel.weight(3.5, &SHAPE, KernelBase::Jinc);
            assert!(w.abs() < f32::EPSILON, "{kernel} leaked {w}");
        }
    }

    #[test]
    fn blur_widens_the_kernel() {
        let sharp = KernelShape { blur: 1.0, ..SHAPE };
        let soft = KernelShape { blur: 1.5, ..SHAPE };
        let k = Kernel::Hamming;
        assert!(k.weight(0.8, &soft, KernelBase::Sinc) > k.weight(0.8, &sharp, KernelBase::Sinc));
    }

    #[test]
    fn bicubic_catmull_rom_interpolates() {
        let shape = KernelShape {
            radius: 2.0,
            blur: 1.0,
            p1: -0.5,
            p2: 0.0,
        };
        let k = Kernel::Bicubic;
        assert!((k.weight(0.0, &shape, KernelBase::Sinc) - 1.0).abs() < 1e-6);
        assert!(k.weight(1.0, &shape, KernelBase::Sinc).abs() < 1e-6);
    }

    #[test]
    fn bc_spline_partition_of_unity() {
        // Mitchell-Netravali weights at any phase sum to one.
        let shape = KernelShape {
            radius: 2.0,
            blur: 1.0,
            p1: 1.0 / 3.0,
            p2: 1.0 / 3.0,
        };
        let phase = 0.3f32;
        let sum: f32 = [-1.0f32, 0.0, 1.0, 2.0]
            .iter()
            .map(|&i| Kernel::BcSpline.weight((i - phase).abs(), &shape, KernelBase::Sinc))
            .sum();
        assert!((sum - 1.0).abs() < 1e-5, "sum = {sum}");
    }

    #[test]
    fn fsr_default_parameters_match_easu() {
        // b = 2/5 gives the 25/16 normalization used by EASU.
        let shape = KernelShape {
            radius: 2.0,
            blur: 1.0,
            p1: 0.4,
            p2: 0.25,
        };
        let w = Kernel::Fsr.weight(0.0, &shape, KernelBase::Sinc);
        assert!((w - 1.0).abs() < 1e-6, "got {w}");
    }

    #[test]
    fn safe_pow_never_produces_nan() {
        assert!((safe_pow(0.0, 0.0) - 1.0).abs() < f64::EPSILON);
        assert!(safe_pow(-0.5, 0.5).abs() < f64::EPSILON);
        assert!(safe_pow(0.0, -2.0).abs() < f64::EPSILON);
        assert!((safe_pow(4.0, 0.5) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn display_names() {
        assert_eq!(Kernel::Gnw.to_string(), "GNW");
        assert_eq!(Kernel::BcSpline.to_string(), "BCSpline");
    }
}
