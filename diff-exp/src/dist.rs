use statrs::distribution::{ContinuousCDF, Normal};

/// Two-sided p-value of a standard normal z statistic
#[inline]
pub fn two_sided_normal_pvalue(z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    // statrs only fails for an invalid sd
    let std_normal = Normal::new(0.0, 1.0).unwrap();
    (2.0 * std_normal.cdf(-z.abs())).min(1.0)
}

/// Bonferroni adjustment for `n_tests` tests, capped at 1
#[inline]
pub fn adjusted_pvalue_bonferroni(pvalue: f64, n_tests: usize) -> f64 {
    (pvalue * n_tests as f64).min(1.0)
}
