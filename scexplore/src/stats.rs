//! Statistics functions

use diff_exp::stat::Statistics;
use std::cmp::Ordering;

/// Median of floating point values; NaN for empty input.
pub fn median(xs: &[f64]) -> f64 {
    xs.median()
}

/// Scaled median absolute deviation, consistent with the standard deviation for normal data
pub fn mad(xs: &[f64]) -> f64 {
    let center = median(xs);
    let deviations: Vec<f64> = xs.iter().map(|x| (x - center).abs()).collect();
    1.4826 * median(&deviations)
}

/// Interquartile range with linearly interpolated quartiles
pub fn iqr(xs: &[f64]) -> f64 {
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted.percentile(75.0) - sorted.percentile(25.0)
}

/// Silverman's rule-of-thumb bandwidth for a Gaussian kernel:
/// `0.9 * min(sd, IQR / 1.34) * n^(-1/5)`.
pub fn bandwidth_silverman(xs: &[f64]) -> f64 {
    let sd = xs.sd(1.0);
    let mut lo = sd.min(iqr(xs) / 1.34);
    if !(lo > 0.0) {
        lo = if sd > 0.0 {
            sd
        } else if let Some(x) = xs.first().filter(|x| **x != 0.0) {
            x.abs()
        } else {
            1.0
        };
    }
    0.9 * lo * (xs.len() as f64).powf(-0.2)
}

/// Scott's variant of the normal reference bandwidth: `1.06 * min(sd, IQR / 1.34) * n^(-1/5)`
pub fn bandwidth_scott(xs: &[f64]) -> f64 {
    let sd = xs.sd(1.0);
    let spread = sd.min(iqr(xs) / 1.34);
    let spread = if spread > 0.0 { spread } else { sd.max(1.0) };
    1.06 * spread * (xs.len() as f64).powf(-0.2)
}

/// Gaussian kernel density estimate of `points` at `x`, with standard deviation `bw`
pub fn gaussian_density(points: &[f64], bw: f64, x: f64) -> f64 {
    let norm = 1.0 / ((2.0 * std::f64::consts::PI).sqrt() * bw * points.len() as f64);
    points
        .iter()
        .map(|p| {
            let z = (x - p) / bw;
            (-0.5 * z * z).exp()
        })
        .sum::<f64>()
        * norm
}

/// Pearson correlation; NaN when either input is constant.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    let mx = x.mean();
    let my = y.mean();
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx) * (a - mx);
        syy += (b - my) * (b - my);
    }
    sxy / (sxx * syy).sqrt()
}
