//! Descriptive statistics on slices
//!
//! ```
//! use diff_exp::stat::Statistics;
//! let v = [1.0, 2.0, 3.0, 4.0];
//! assert_eq!(v.mean(), 2.5);
//! assert_eq!(v.median(), 2.5);
//! ```
use num_traits::ToPrimitive;
use std::cmp::Ordering;

/// Statistics Trait
///
/// It contains `mean`, `sum`, `var`, `sd`, `percentile`, `median`
pub trait Statistics {
    /// Sum, computed with compensated (Neumaier) summation
    fn sum(&self) -> f64;
    /// Mean; NaN for an empty slice
    fn mean(&self) -> f64;
    /// Variance with `ddof` delta degrees of freedom (1.0 for the sample variance)
    fn var(&self, ddof: f64) -> f64;
    /// Standard deviation with `ddof` delta degrees of freedom
    fn sd(&self, ddof: f64) -> f64 {
        self.var(ddof).sqrt()
    }
    /// Percentile with linear interpolation between the closest ranks, `pct` in [0, 100]
    fn percentile(&self, pct: f64) -> f64;
    /// Median
    fn median(&self) -> f64 {
        self.percentile(50.0)
    }
}

impl<T: ToPrimitive + Copy> Statistics for [T] {
    fn sum(&self) -> f64 {
        let mut sum = 0.0f64;
        let mut c = 0.0f64;
        for x in self {
            let x = x.to_f64().unwrap_or(f64::NAN);
            let t = sum + x;
            if sum.abs() >= x.abs() {
                c += (sum - t) + x;
            } else {
                c += (x - t) + sum;
            }
            sum = t;
        }
        sum + c
    }

    fn mean(&self) -> f64 {
        if self.is_empty() {
            return f64::NAN;
        }
        Statistics::sum(self) / self.len() as f64
    }

    fn var(&self, ddof: f64) -> f64 {
        let n = self.len() as f64;
        if n <= ddof {
            return f64::NAN;
        }
        let mean = self.mean();
        let ss: f64 = self
            .iter()
            .map(|x| {
                let d = x.to_f64().unwrap_or(f64::NAN) - mean;
                d * d
            })
            .sum();
        ss / (n - ddof)
    }

    fn percentile(&self, pct: f64) -> f64 {
        let mut sorted: Vec<f64> = self.iter().map(|x| x.to_f64().unwrap_or(f64::NAN)).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        percentile_of_sorted(&sorted, pct)
    }
}

fn percentile_of_sorted(sorted: &[f64], pct: f64) -> f64 {
    assert!((0.0..=100.0).contains(&pct));
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (pct / 100.0) * (n - 1) as f64;
            let lrank = rank.floor();
            let d = rank - lrank;
            let lo = lrank as usize;
            if lo + 1 >= n {
                sorted[n - 1]
            } else {
                sorted[lo] + (sorted[lo + 1] - sorted[lo]) * d
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_stats() {
        let v = [2u32, 4, 4, 4, 5, 5, 7, 9];
        assert_eq!(v.mean(), 5.0);
        assert_eq!(v.var(0.0), 4.0);
        assert_approx_eq!(v.sd(1.0), (32.0f64 / 7.0).sqrt());
        assert_eq!(v.median(), 4.5);
        assert_eq!(v.percentile(0.0), 2.0);
        assert_eq!(v.percentile(100.0), 9.0);
        assert_approx_eq!(v.percentile(25.0), 4.0);

        let empty: [f64; 0] = [];
        assert!(empty.mean().is_nan());
        assert!([1.0].var(1.0).is_nan());
    }

    #[test]
    fn test_compensated_sum() {
        let v = [1e16, 1.0, -1e16];
        assert_eq!(Statistics::sum(&v[..]), 1.0);
    }
}
