//! Image similarity scoring.

/// A full-reference image quality score. Higher means more similar.
pub trait SimilarityMetric {
    /// Score two `width x height` images given as pixel accessors
    /// returning samples in `[0, dynamic range]`.
    fn score(
        &self,
        width: u32,
        height: u32,
        reference: &dyn Fn(u32, u32) -> f64,
        candidate: &dyn Fn(u32, u32) -> f64,
    ) -> f64;
}

/// Mean structural similarity with a Gaussian window.
///
/// Local statistics come from a separable Gaussian blur (edges repeat);
/// the result is the mean of the per-pixel SSIM map, so identical inputs
/// score exactly `1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ssim {
    /// Luminance stabilizer, scaled by the dynamic range.
    pub k1: f64,
    /// Contrast stabilizer, scaled by the dynamic range.
    pub k2: f64,
    /// Standard deviation of the Gaussian window in pixels.
    pub sigma: f64,
    /// Sample value range.
    pub dynamic_range: f64,
}

impl Ssim {
    /// Default `K1`.
    pub const DEFAULT_K1: f64 = 0.01;
    /// Default `K2`.
    pub const DEFAULT_K2: f64 = 0.03;
    /// Default window sigma.
    pub const DEFAULT_SIGMA: f64 = 1.5;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn window(&self) -> Vec<f64> {
        let sigma = self.sigma.max(f64::EPSILON);
        let half = (3.0 * sigma).ceil().max(1.0) as usize;
        let mut taps: Vec<f64> = (0..=2 * half)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let d = i as f64 - half as f64;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let total: f64 = taps.iter().sum();
        for t in &mut taps {
            *t /= total;
        }
        taps
    }
}

impl Default for Ssim {
    fn default() -> Self {
        Self {
            k1: Self::DEFAULT_K1,
            k2: Self::DEFAULT_K2,
            sigma: Self::DEFAULT_SIGMA,
            dynamic_range: 1.0,
        }
    }
}

/// Separable blur of a row-major plane with edge repetition.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn blur(plane: &[f64], width: usize, height: usize, taps: &[f64]) -> Vec<f64> {
    let half = (taps.len() / 2) as isize;
    let clamp = |v: isize, len: usize| v.clamp(0, len as isize - 1) as usize;

    let mut horizontal = vec![0.0; plane.len()];
    for y in 0..height {
        let row = &plane[y * width..(y + 1) * width];
        for x in 0..width {
            horizontal[y * width + x] = taps
                .iter()
                .enumerate()
                .map(|(k, w)| w * row[clamp(x as isize + k as isize - half, width)])
                .sum();
        }
    }

    let mut out = vec![0.0; plane.len()];
    for y in 0..height {
        for x in 0..width {
            out[y * width + x] = taps
                .iter()
                .enumerate()
                .map(|(k, w)| w * horizontal[clamp(y as isize + k as isize - half, height) * width + x])
                .sum();
        }
    }
    out
}

impl SimilarityMetric for Ssim {
    #[allow(clippy::cast_precision_loss, clippy::similar_names)]
    fn score(
        &self,
        width: u32,
        height: u32,
        reference: &dyn Fn(u32, u32) -> f64,
        candidate: &dyn Fn(u32, u32) -> f64,
    ) -> f64 {
        let (w, h) = (width as usize, height as usize);
        let n = w * h;
        if n == 0 {
            return 0.0;
        }

        let mut a = Vec::with_capacity(n);
        let mut b = Vec::with_capacity(n);
        for y in 0..height {
            for x in 0..width {
                a.push(reference(x, y));
                b.push(candidate(x, y));
            }
        }
        let aa: Vec<f64> = a.iter().map(|v| v * v).collect();
        let bb: Vec<f64> = b.iter().map(|v| v * v).collect();
        let ab: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x * y).collect();

        let taps = self.window();
        let mu_a = blur(&a, w, h, &taps);
        let mu_b = blur(&b, w, h, &taps);
        let e_aa = blur(&aa, w, h, &taps);
        let e_bb = blur(&bb, w, h, &taps);
        let e_ab = blur(&ab, w, h, &taps);

        let c1 = (self.k1 * self.dynamic_range).powi(2);
        let c2 = (self.k2 * self.dynamic_range).powi(2);

        let total: f64 = (0..n)
            .map(|i| {
                let (ma, mb) = (mu_a[i], mu_b[i]);
                let var_a = e_aa[i] - ma * ma;
                let var_b = e_bb[i] - mb * mb;
                let cov = e_ab[i] - ma * mb;
                let num = (2.0 * ma * mb + c1) * (2.0 * cov + c2);
                let den = (ma * ma + mb * mb + c1) * (var_a + var_b + c2);
                num / den
            })
            .sum();
        total / n as f64
    }
}
