//! Smoothing of per-gene model parameters as a function of gene abundance.

use crate::stats::{bandwidth_silverman, mad, median};

/// Standard deviation of the Gaussian kernel whose quartiles sit at +/- `bandwidth / 4`
const KERNEL_SD_PER_BANDWIDTH: f64 = 0.3706506;

fn robust_scale(values: &[f64]) -> Vec<f64> {
    let center = median(values);
    let spread = mad(values) + f64::EPSILON;
    values.iter().map(|v| (v - center) / spread).collect()
}

/// Robust z-scores of `y` within bins of `x` starting at `start` with width `width`.
fn robust_scale_binned(y: &[f64], x: &[f64], start: f64, width: f64) -> Vec<f64> {
    let bin_of = |v: f64| ((v - start) / width).floor() as i64;
    let mut order: Vec<usize> = (0..x.len()).collect();
    order.sort_by_key(|&i| bin_of(x[i]));

    let mut score = vec![0.0; x.len()];
    let mut i = 0;
    while i < order.len() {
        let bin = bin_of(x[order[i]]);
        let mut j = i;
        while j < order.len() && bin_of(x[order[j]]) == bin {
            j += 1;
        }
        let members = &order[i..j];
        let values: Vec<f64> = members.iter().map(|&k| y[k]).collect();
        for (&k, s) in members.iter().zip(robust_scale(&values)) {
            score[k] = s;
        }
        i = j;
    }
    score
}

/// Flag values of `y` that deviate by more than `threshold` robust standard deviations
/// from genes of similar `x`. Two staggered binnings are used and the smaller deviation
/// counts, so a gene is not flagged just for sitting at the edge of a bin.
pub fn is_outlier(y: &[f64], x: &[f64], threshold: f64) -> Vec<bool> {
    let (min, max) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let width = (max - min) * bandwidth_silverman(x) / 2.0;
    if !(width > 0.0) || !width.is_finite() {
        return vec![false; y.len()];
    }
    let eps = f64::EPSILON * 10.0;
    let score1 = robust_scale_binned(y, x, min - eps, width);
    let score2 = robust_scale_binned(y, x, min - eps - width / 2.0, width);
    score1
        .iter()
        .zip(&score2)
        .map(|(a, b)| a.abs().min(b.abs()) > threshold)
        .collect()
}

/// Nadaraya-Watson estimate of `y` at `at` with a Gaussian kernel. Points further
/// than 4 kernel standard deviations are ignored; with no point in range, the value
/// of the closest point is returned.
pub fn kernel_smooth(x: &[f64], y: &[f64], bandwidth: f64, at: f64) -> f64 {
    let sd = KERNEL_SD_PER_BANDWIDTH * bandwidth;
    let cutoff = 4.0 * sd;
    let mut num = 0.0;
    let mut den = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let d = xi - at;
        if d.abs() <= cutoff {
            let w = (-0.5 * (d / sd).powi(2)).exp();
            num += w * yi;
            den += w;
        }
    }
    if den > 0.0 {
        return num / den;
    }
    x.iter()
        .zip(y)
        .min_by(|a, b| (a.0 - at).abs().total_cmp(&(b.0 - at).abs()))
        .map_or(f64::NAN, |(_, &yi)| yi)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_outlier() {
        let x: Vec<f64> = (0..200).map(|i| i as f64 / 20.0).collect();
        let mut y: Vec<f64> = x.iter().map(|v| 0.5 * v + 0.01 * ((v * 37.0).sin())).collect();
        y[100] += 50.0;
        let flagged = is_outlier(&y, &x, 10.0);
        assert!(flagged[100]);
        assert_eq!(flagged.iter().filter(|&&f| f).count(), 1);

        assert!(is_outlier(&[1.0, 2.0], &[3.0, 3.0], 10.0).iter().all(|f| !f));
    }

    #[test]
    fn test_kernel_smooth() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 1.0, 1.0, 1.0];
        assert_approx_eq!(kernel_smooth(&x, &y, 1.0, 1.5), 1.0);

        // symmetric neighbors average out
        let y = [0.0, 1.0, 3.0, 4.0];
        assert_approx_eq!(kernel_smooth(&x, &y, 2.0, 1.5), 2.0);

        // nothing within the cutoff: nearest point
        assert_eq!(kernel_smooth(&x, &y, 0.01, 2.9), 4.0);
    }
}
